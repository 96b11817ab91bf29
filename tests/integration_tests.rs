use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use loader_cache::{Cache, CacheBuilder, CacheError, CloseError, LoadedUnit, ResourceKey};
use parking_lot::Mutex;

/// Counting unit: records how often it was closed.
struct CountingUnit {
	closes: Arc<AtomicUsize>,
}

impl LoadedUnit for CountingUnit {
	fn close(&self) -> Result<(), CloseError> {
		self.closes.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

/// Unit holding real open file handles on its libraries, released on close.
struct LibraryUnit {
	files: Mutex<Vec<File>>,
}

impl LibraryUnit {
	fn open(key: &ResourceKey) -> Self {
		let files = key
			.libraries()
			.iter()
			.map(|path| File::open(path).expect("library file should open"))
			.collect();
		Self {
			files: Mutex::new(files),
		}
	}

	fn open_handles(&self) -> usize {
		self.files.lock().len()
	}
}

impl LoadedUnit for LibraryUnit {
	fn close(&self) -> Result<(), CloseError> {
		// Dropping the handles releases them; already-closed is a no-op.
		self.files.lock().clear();
		Ok(())
	}
}

fn key(name: &str) -> ResourceKey {
	ResourceKey::new([format!("{name}.so")])
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
	let deadline = Instant::now() + Duration::from_secs(5);
	while Instant::now() < deadline {
		if condition() {
			return true;
		}
		thread::sleep(Duration::from_millis(1));
	}
	condition()
}

#[test]
fn test_acquire_release_reclaim_roundtrip() {
	let cache = Cache::new();
	let closes = Arc::new(AtomicUsize::new(0));

	let handle = {
		let closes = Arc::clone(&closes);
		cache
			.acquire(key("plugin"), move |_| CountingUnit {
				closes,
			})
			.expect("acquire should succeed")
	};
	assert_eq!(cache.len(), 1);
	assert!(cache.contains(&key("plugin")));

	drop(handle);
	assert!(wait_until(|| closes.load(Ordering::SeqCst) == 1 && cache.pending_len() == 0));
	assert!(cache.is_empty());

	cache.shutdown();
	assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_same_key_second_builder_never_runs() {
	let cache = Cache::new();
	let closes = Arc::new(AtomicUsize::new(0));

	let first = {
		let closes = Arc::clone(&closes);
		cache
			.acquire(key("plugin"), move |_| CountingUnit {
				closes,
			})
			.expect("acquire should succeed")
	};
	let second = cache
		.acquire(key("plugin"), |_| -> CountingUnit {
			panic!("builder must not run for a cached key");
		})
		.expect("acquire should succeed");

	assert!(std::ptr::eq(first.unit(), second.unit()));
	drop(first);
	drop(second);
	cache.shutdown();
	assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_release_then_immediate_shutdown_closes_exactly_once() {
	// Race the shutdown drain against the finalizer, repeatedly.
	for _ in 0..50 {
		let cache = Cache::new();
		let closes = Arc::new(AtomicUsize::new(0));

		let handle = {
			let closes = Arc::clone(&closes);
			cache
				.acquire(key("plugin"), move |_| CountingUnit {
					closes,
				})
				.expect("acquire should succeed")
		};
		drop(handle);
		cache.shutdown();

		assert_eq!(closes.load(Ordering::SeqCst), 1);
		assert_eq!(cache.pending_len(), 0);
	}
}

#[test]
fn test_shutdown_closes_units_with_outstanding_handles() {
	let cache = Cache::new();
	let closes = Arc::new(AtomicUsize::new(0));

	let handle = {
		let closes = Arc::clone(&closes);
		cache
			.acquire(key("plugin"), move |_| CountingUnit {
				closes,
			})
			.expect("acquire should succeed")
	};

	cache.shutdown();
	assert_eq!(closes.load(Ordering::SeqCst), 1);

	// The straggler release must not close the unit again.
	drop(handle);
	assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_acquire_after_shutdown_fails_closed() {
	let cache: Cache<CountingUnit> = Cache::new();
	cache.shutdown();

	let result = cache.acquire(key("plugin"), |_| unreachable!());
	assert!(matches!(result, Err(CacheError::Closed)));
}

#[test]
fn test_empty_key_is_rejected() {
	let cache: Cache<CountingUnit> = Cache::new();
	let empty = ResourceKey::new(Vec::<PathBuf>::new());

	let result = cache.acquire(empty, |_| unreachable!());
	assert!(matches!(result, Err(CacheError::InvalidKey)));
	cache.shutdown();
}

#[test]
fn test_double_release_detected_across_drop() {
	let cache = Cache::new();
	let closes = Arc::new(AtomicUsize::new(0));

	let mut handle = {
		let closes = Arc::clone(&closes);
		cache
			.acquire(key("plugin"), move |_| CountingUnit {
				closes,
			})
			.expect("acquire should succeed")
	};

	assert!(handle.release().is_ok());
	assert_eq!(handle.release(), Err(CacheError::DoubleRelease));

	// Dropping the released handle must not decrement again.
	drop(handle);
	assert!(wait_until(|| closes.load(Ordering::SeqCst) == 1));
	cache.shutdown();
	assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_parent_keys_isolate_contexts() {
	let cache = Cache::new();
	let closes = Arc::new(AtomicUsize::new(0));
	let builds = Arc::new(AtomicUsize::new(0));

	let build = |builds: &Arc<AtomicUsize>, closes: &Arc<AtomicUsize>| {
		let builds = Arc::clone(builds);
		let closes = Arc::clone(closes);
		move |_key: &ResourceKey| {
			builds.fetch_add(1, Ordering::SeqCst);
			CountingUnit {
				closes,
			}
		}
	};

	let base = key("base");
	let plain = cache
		.acquire(key("plugin"), build(&builds, &closes))
		.expect("acquire should succeed");
	let nested = cache
		.acquire(key("plugin").with_parent(base), build(&builds, &closes))
		.expect("acquire should succeed");

	// Same locations, different parent: distinct units.
	assert!(!std::ptr::eq(plain.unit(), nested.unit()));
	assert_eq!(builds.load(Ordering::SeqCst), 2);
	assert_eq!(cache.len(), 2);

	drop(plain);
	drop(nested);
	cache.shutdown();
	assert_eq!(closes.load(Ordering::SeqCst), 2);
}

#[test]
fn test_concurrent_mixed_workload() {
	let cache = Arc::new(Cache::new());
	let closes = Arc::new(AtomicUsize::new(0));
	let builds = Arc::new(AtomicUsize::new(0));

	let mut threads = vec![];
	for t in 0..8 {
		let cache = Arc::clone(&cache);
		let closes = Arc::clone(&closes);
		let builds = Arc::clone(&builds);
		threads.push(thread::spawn(move || {
			for i in 0..50 {
				// Few keys, so threads constantly collide on them.
				let name = format!("k{}", (t + i) % 4);
				let closes = Arc::clone(&closes);
				let builds = Arc::clone(&builds);
				let handle = cache
					.acquire(key(&name), move |_| {
						builds.fetch_add(1, Ordering::SeqCst);
						CountingUnit {
							closes,
						}
					})
					.expect("acquire should succeed");
				if i % 3 == 0 {
					thread::yield_now();
				}
				drop(handle);
			}
		}));
	}
	for thread in threads {
		thread.join().expect("worker thread should not panic");
	}

	cache.shutdown();

	// Every built unit was closed exactly once, whatever the interleaving.
	assert_eq!(closes.load(Ordering::SeqCst), builds.load(Ordering::SeqCst));
	assert_eq!(cache.len(), 0);
	assert_eq!(cache.pending_len(), 0);

	let metrics = cache.metrics();
	assert_eq!(metrics.hits + metrics.builds, 8 * 50);
	assert_eq!(metrics.reclaimed, metrics.builds);
}

#[test]
fn test_library_units_hold_and_release_file_handles() {
	let dir = tempfile::tempdir().expect("tempdir should be created");
	let mut libraries = vec![];
	for name in ["scanner.so", "common.so"] {
		let path = dir.path().join(name);
		std::fs::write(&path, b"\x7fELF").expect("library file should be written");
		libraries.push(path);
	}

	let cache = Cache::new();
	let key = ResourceKey::new(libraries);

	let handle = cache
		.acquire(key.clone(), LibraryUnit::open)
		.expect("acquire should succeed");
	assert_eq!(handle.open_handles(), 2);

	// The unit is still usable through a second handle after the first goes.
	let second = cache
		.acquire(key, |_| panic!("cached unit should be reused"))
		.expect("acquire should succeed");
	drop(handle);
	assert_eq!(second.open_handles(), 2);

	drop(second);
	cache.shutdown();
}

#[test]
fn test_reclaim_observer_reports_each_key() {
	let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(vec![]));
	let cache: Cache<CountingUnit> = {
		let seen = Arc::clone(&seen);
		CacheBuilder::new()
			.thread_name("observer-test-finalizer")
			.on_reclaim(move |key| seen.lock().push(key.to_string()))
			.build()
	};
	let closes = Arc::new(AtomicUsize::new(0));

	for name in ["a", "b"] {
		let closes = Arc::clone(&closes);
		let handle = cache
			.acquire(key(name), move |_| CountingUnit {
				closes,
			})
			.expect("acquire should succeed");
		drop(handle);
	}
	cache.shutdown();

	let mut seen = seen.lock().clone();
	seen.sort();
	assert_eq!(seen, ["[a.so]", "[b.so]"]);
	assert_eq!(closes.load(Ordering::SeqCst), 2);
}
