//! This example is designed to test the implementation of
//! the trait `GlobalAlloc` on the arena. See [`GlobalArena`] to
//! see the actual trait implementation.

use arenalloc::GlobalArena;
use std::thread;

#[global_allocator]
static ALLOCATOR: GlobalArena = GlobalArena::with_capacity(64 * 1024 * 1024);

fn main() {

    // Box example
    let val_box = Box::new(22);
    println!("Box Value: {}, At: {:p}", val_box, val_box);

    // Vec example
    let mut v = Vec::new();
    for i in 0..5 {
        v.push(i * 10);
        println!("Added {}; Capacity: {}; At: {:p}",
            v[i], v.capacity(), v.as_ptr());
    }

    // String example
    let msg = String::from("Heap Testing");
    println!("\nString '{}' - At: {:p}", msg, msg.as_ptr());

    // Merge example: two neighbours released together fit a block of their combined size.
    let a = Box::new([0u8; 64]);
    let b = Box::new([0u8; 48]);
    let ptr_a = a.as_ptr();

    drop(a);
    drop(b);

    let c = Box::new([0u8; 128]);
    let ptr_c = c.as_ptr();

    if ptr_a == ptr_c {
        println!("Correctly reused at {:p}", ptr_c);
    } else {
        println!("Not reused. A was at {:p} and C is at {:p}", ptr_a, ptr_c);
    }

    // Thread example: callers are serialized by the arena lock.
    let handles: Vec<_> = (0..4)
        .map(|i| thread::spawn(move || Box::new(i * 111)))
        .collect();

    for handle in handles {
        let value = handle.join().unwrap();
        println!("Thread produced {} at {:p}", value, value);
    }

    println!("Free bytes left: {}", ALLOCATOR.free_bytes());
}
