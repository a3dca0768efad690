use std::io;

use arenalloc::{Allocation, Arena, ArenaConfig};

fn log_alloc(arena: &Arena, requested: u64, allocation: Allocation) {
    println!("Requested {requested} bytes of memory");
    println!(
        "Received offset {} with {} usable bytes",
        arena.offset_of(allocation),
        arena.usable_size(allocation)
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut arena = Arena::boxed(ArenaConfig::with_capacity(1024))?;

    let a1 = arena.allocate(8).ok_or("arena exhausted")?;
    log_alloc(&arena, 8, a1);

    let a2 = arena.allocate(24).ok_or("arena exhausted")?;
    log_alloc(&arena, 24, a2);

    let a3 = arena.allocate(100).ok_or("arena exhausted")?;
    log_alloc(&arena, 100, a3);

    arena.data_mut(a2).fill(0xab);

    arena.dump(&mut io::stdout())?;

    // Leaves a hole before a3, then fills it back with a block of the same size.
    arena.release(Some(a2));
    let a4 = arena.allocate(32).ok_or("arena exhausted")?;
    println!("Freed block reused: {}", a4 == a2);

    arena.release(Some(a1));
    arena.release(Some(a4));
    arena.release(Some(a3));

    arena.dump(&mut io::stdout())?;
    arena.check()?;

    Ok(())
}
