//! End-to-end scenarios over a fixed in-memory region.

use bestfit_malloc::growers::ArenaGrower;
use bestfit_malloc::BestFitMalloc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn mixed_workload_keeps_data_intact() {
    init_tracing();
    let mut region = vec![0_u8; 1 << 16];
    let grower = ArenaGrower::new(region.as_mut_ptr(), region.len());
    let mut malloc = unsafe { BestFitMalloc::with_grower(grower) };

    // A spread of odd sizes, everything filled with a distinct byte.
    let sizes = [10, 2, 14, 34, 53, 34, 54, 42, 42, 46];
    let mut live: Vec<(*mut u8, usize, u8)> = Vec::new();
    for (i, &size) in sizes.iter().enumerate() {
        let p = malloc.allocate(size).unwrap();
        let fill = 0xA0 + i as u8;
        unsafe { p.as_ptr().write_bytes(fill, size) };
        live.push((p.as_ptr(), size, fill));
    }

    // Free every other one; the survivors must be untouched.
    for (p, ..) in live.iter().copied().step_by(2) {
        malloc.release(p).unwrap();
    }
    live = live.into_iter().skip(1).step_by(2).collect();
    for &(p, size, fill) in &live {
        for i in 0..size {
            assert_eq!(unsafe { p.add(i).read() }, fill);
        }
    }

    // Zeroed allocations must come back scrubbed even when they land in
    // recycled space.
    for count in [13, 17, 9, 5] {
        let p = malloc.allocate_zeroed(count, 4).unwrap();
        for i in 0..count * 4 {
            assert_eq!(unsafe { p.as_ptr().add(i).read() }, 0);
        }
        unsafe { p.as_ptr().write_bytes(0x11, count * 4) };
        live.push((p.as_ptr(), count * 4, 0x11));
    }

    // Growing every block must preserve its old contents.
    let mut moved = Vec::new();
    for (p, size, fill) in live {
        let q = malloc.resize(p, size + 64).unwrap();
        for i in 0..size {
            assert_eq!(unsafe { q.as_ptr().add(i).read() }, fill);
        }
        moved.push((q.as_ptr(), size, fill));
    }

    for (p, ..) in moved {
        malloc.release(p).unwrap();
    }
    // Everything merged back; at most physically separated free runs remain,
    // and no occupied block carries slack.
    let frag = malloc.total_fragmentation();
    assert_eq!(frag % 8, 0, "fragmentation counts whole rounded blocks");
}

#[test]
fn random_churn_never_hands_out_overlapping_memory() {
    init_tracing();
    let mut region = vec![0_u8; 1 << 20];
    let grower = ArenaGrower::new(region.as_mut_ptr(), region.len());
    let mut malloc = unsafe { BestFitMalloc::with_grower(grower) };

    let mut rng = StdRng::seed_from_u64(0xB10C);
    let mut live: Vec<(usize, usize, u8)> = Vec::new();

    for round in 0..4000_usize {
        let prefer_release = live.len() > 256;
        if !live.is_empty() && (prefer_release || rng.gen_bool(0.4)) {
            let at = rng.gen_range(0..live.len());
            let (addr, size, fill) = live.swap_remove(at);
            for i in 0..size {
                assert_eq!(
                    unsafe { (addr as *const u8).add(i).read() },
                    fill,
                    "byte {i} of the block at {addr:#x} was corrupted"
                );
            }
            malloc.release(addr as *mut u8).unwrap();
        } else {
            let size = rng.gen_range(1..=512);
            let Some(p) = malloc.allocate(size) else {
                // Region exhausted; the next rounds will release.
                continue;
            };
            let addr = p.as_ptr() as usize;
            assert_eq!(addr % 8, 0);
            for &(other, other_size, _) in &live {
                let disjoint = addr + size <= other || other + other_size <= addr;
                assert!(disjoint, "fresh allocation overlaps a live block");
            }
            let fill = (round % 251) as u8;
            unsafe { p.as_ptr().write_bytes(fill, size) };
            live.push((addr, size, fill));
        }
    }

    let last = live.last().map(|&(addr, ..)| addr);
    for (addr, ..) in live {
        malloc.release(addr as *mut u8).unwrap();
    }
    if let Some(addr) = last {
        // Releasing again must fail loudly, one way or another.
        assert!(malloc.release(addr as *mut u8).is_err());
    }
}
