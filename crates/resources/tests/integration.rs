//! Integration tests for the resource registry

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use warden_errors::{Error, RegistryError};
    use warden_events::{channel, AppEvent, DisposeTrigger, RegistryEvent};
    use warden_resources::*;
    use warden_types::{NativePtr, ResourceId};

    fn counting_release(counter: &Arc<AtomicUsize>) -> ReleaseFn {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_duplicate_pointer_rejected() {
        let registry = ResourceRegistry::new();
        let ptr = NativePtr::from_addr(0x1000);
        let id = registry.register(ptr, ResourceId::NONE).unwrap();

        let err = registry.register(ptr, ResourceId::NONE).unwrap_err();
        assert_eq!(
            err,
            Error::Registry(RegistryError::DuplicateResource { ptr, existing: id })
        );
        assert_eq!(registry.lookup_ptr(ptr).unwrap().id, id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_root_dispose_cascades_to_children() {
        let registry = ResourceRegistry::new();
        let released = Arc::new(AtomicUsize::new(0));
        let root = registry
            .register_as(
                NativePtr::from_addr(0x10),
                ResourceId::NONE,
                "dataset",
                Some(counting_release(&released)),
            )
            .unwrap();
        let children: Vec<_> = (1..=3)
            .map(|n| {
                registry
                    .register_as(
                        NativePtr::from_addr(0x10 + n),
                        root,
                        "band",
                        Some(counting_release(&released)),
                    )
                    .unwrap()
            })
            .collect();

        let info = registry.lookup(root).unwrap();
        assert!(info.is_root());
        assert_eq!(info.children, children);
        assert_eq!(registry.lookup(children[0]).unwrap().kind, "band");

        registry.dispose(root).unwrap();

        for id in std::iter::once(root).chain(children.iter().copied()) {
            assert!(!registry.is_alive(id));
            assert!(registry.lookup(id).is_none());
        }
        for addr in 0x10..=0x13 {
            assert!(registry.lookup_ptr(NativePtr::from_addr(addr)).is_none());
        }
        assert_eq!(released.load(Ordering::SeqCst), 4);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dispose_idle_and_disposed() {
        let registry = ResourceRegistry::new();
        let id = registry
            .register(NativePtr::from_addr(0x20), ResourceId::NONE)
            .unwrap();

        let started = Instant::now();
        registry.dispose(id).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        // second disposal and unknown ids are no-ops
        registry.dispose(id).unwrap();
        registry.dispose(ResourceId::new(12345)).unwrap();
    }

    #[test]
    fn test_dispose_waits_for_lock_holder() {
        let registry = Arc::new(ResourceRegistry::new());
        let root = registry
            .register(NativePtr::from_addr(0x30), ResourceId::NONE)
            .unwrap();
        let finished = Arc::new(AtomicBool::new(false));

        let token = registry.lock_root(root).unwrap();
        let disposer = {
            let registry = Arc::clone(&registry);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                registry.dispose(root).unwrap();
                finished.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!finished.load(Ordering::SeqCst));
        assert!(registry.is_alive(root));

        drop(token);
        disposer.join().unwrap();
        assert!(finished.load(Ordering::SeqCst));
        assert!(!registry.is_alive(root));
    }

    #[test]
    fn test_dispose_while_holding_is_hazard() {
        let registry = ResourceRegistry::new();
        let root = registry
            .register(NativePtr::from_addr(0x40), ResourceId::NONE)
            .unwrap();
        let child = registry.register(NativePtr::from_addr(0x41), root).unwrap();

        let guard = registry.lock_roots(&[root]).unwrap();
        assert!(registry.dispose(root).unwrap_err().is_hazard());
        assert!(registry.dispose(child).unwrap_err().is_hazard());
        drop(guard);

        registry.dispose(root).unwrap();
        assert!(!registry.is_alive(child));
    }

    #[test]
    fn test_lock_gone_root_fails_fast() {
        let registry = ResourceRegistry::new();
        let a = registry
            .register(NativePtr::from_addr(0x50), ResourceId::NONE)
            .unwrap();
        let b = registry
            .register(NativePtr::from_addr(0x51), ResourceId::NONE)
            .unwrap();
        registry.dispose(b).unwrap();

        assert!(registry.lock_roots(&[a, b]).unwrap_err().is_resource_gone());
        assert!(registry.lock_root(b).unwrap_err().is_resource_gone());
        assert!(!registry.is_locked(a));
    }

    #[test]
    fn test_root_lock_is_exclusive() {
        let registry = Arc::new(ResourceRegistry::new());
        let root = registry
            .register(NativePtr::from_addr(0x60), ResourceId::NONE)
            .unwrap();
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let inside = Arc::clone(&inside);
                let overlaps = Arc::clone(&overlaps);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let _guard = registry.lock_roots(&[root]).unwrap();
                        if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_child_disposal_racing_parent_cascade() {
        for round in 0..50 {
            let registry = Arc::new(ResourceRegistry::new());
            let released = Arc::new(AtomicUsize::new(0));
            let base = 0x1000 * (round + 1);
            let root = registry
                .register_with_release(
                    NativePtr::from_addr(base),
                    ResourceId::NONE,
                    counting_release(&released),
                )
                .unwrap();
            let children: Vec<_> = (1..=4)
                .map(|n| {
                    registry
                        .register_with_release(
                            NativePtr::from_addr(base + n),
                            root,
                            counting_release(&released),
                        )
                        .unwrap()
                })
                .collect();

            let racers: Vec<_> = children
                .iter()
                .map(|&child| {
                    let registry = Arc::clone(&registry);
                    thread::spawn(move || registry.dispose(child).unwrap())
                })
                .collect();
            registry.dispose(root).unwrap();
            for racer in racers {
                racer.join().unwrap();
            }

            assert_eq!(released.load(Ordering::SeqCst), 5);
            assert!(registry.is_empty());
        }
    }

    #[test]
    fn test_registry_events() {
        let (tx, mut rx) = channel();
        let registry = ResourceRegistry::with_events(tx);
        let root = registry
            .register_as(NativePtr::from_addr(0x70), ResourceId::NONE, "dataset", None)
            .unwrap();
        let child = registry
            .register_as(NativePtr::from_addr(0x71), root, "band", None)
            .unwrap();
        registry.dispose(root).unwrap();

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|message| message.event)
            .collect();
        assert_eq!(events.len(), 4);
        assert!(matches!(
            &events[0],
            AppEvent::Registry(RegistryEvent::Registered { id, kind, .. })
                if *id == root && kind == "dataset"
        ));
        assert!(matches!(
            &events[2],
            AppEvent::Registry(RegistryEvent::Disposed { id, trigger: DisposeTrigger::Explicit, children: 1, .. })
                if *id == root
        ));
        assert!(matches!(
            &events[3],
            AppEvent::Registry(RegistryEvent::Disposed { id, trigger: DisposeTrigger::Cascade, .. })
                if *id == child
        ));
    }

    #[test]
    fn test_tracker_disposal_of_child_proxy() {
        let registry = Arc::new(ResourceRegistry::new());
        let dataset = registry
            .wrap(NativePtr::from_addr(0x80), ResourceId::NONE, "dataset", || "ds", None)
            .unwrap();
        let band = registry
            .wrap(NativePtr::from_addr(0x81), dataset.id(), "band", || 1_u8, None)
            .unwrap();
        let band_id = band.id();

        assert!(registry.lookup(band_id).unwrap().has_proxy);
        drop(band);
        assert!(!registry.is_alive(band_id));
        assert!(registry.lookup(dataset.id()).unwrap().children.is_empty());
    }

    fn lock_set(roots: &[ResourceId], picks: &[usize]) -> Vec<ResourceId> {
        picks.iter().map(|pick| roots[pick % roots.len()]).collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_concurrent_lock_sets_never_deadlock(
            sets in prop::collection::vec(prop::collection::vec(0usize..6, 1..5), 2..6),
        ) {
            let registry = Arc::new(ResourceRegistry::new());
            let roots: Vec<_> = (1..=6)
                .map(|n| registry.register(NativePtr::from_addr(n * 0x10), ResourceId::NONE).unwrap())
                .collect();
            let holders: Arc<Vec<AtomicUsize>> =
                Arc::new((0..roots.len()).map(|_| AtomicUsize::new(0)).collect());
            let violations = Arc::new(AtomicUsize::new(0));

            let workers: Vec<_> = sets
                .iter()
                .map(|picks| {
                    let ids = lock_set(&roots, picks);
                    let registry = Arc::clone(&registry);
                    let holders = Arc::clone(&holders);
                    let violations = Arc::clone(&violations);
                    thread::spawn(move || {
                        for _ in 0..20 {
                            let guard = registry.lock_roots(&ids).unwrap();
                            for root in guard.roots() {
                                let slot = &holders[usize::try_from(root.get() - 1).unwrap()];
                                if slot.fetch_add(1, Ordering::SeqCst) != 0 {
                                    violations.fetch_add(1, Ordering::SeqCst);
                                }
                            }
                            thread::yield_now();
                            for root in guard.roots() {
                                holders[usize::try_from(root.get() - 1).unwrap()]
                                    .fetch_sub(1, Ordering::SeqCst);
                            }
                        }
                    })
                })
                .collect();

            for worker in workers {
                worker.join().unwrap();
            }
            prop_assert_eq!(violations.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn prop_overlapping_sets_complete(order in prop::sample::select(vec![0usize, 1])) {
            let registry = Arc::new(ResourceRegistry::new());
            let roots: Vec<_> = (1..=3)
                .map(|n| registry.register(NativePtr::from_addr(n * 0x10), ResourceId::NONE).unwrap())
                .collect();
            let sets = [vec![roots[2], roots[0], roots[1]], vec![roots[1], roots[2]]];
            let done = Arc::new(AtomicUsize::new(0));

            let workers: Vec<_> = (0..2)
                .map(|n| {
                    let ids = sets[(n + order) % 2].clone();
                    let registry = Arc::clone(&registry);
                    let done = Arc::clone(&done);
                    thread::spawn(move || {
                        for _ in 0..50 {
                            let _guard = registry.lock_roots(&ids).unwrap();
                        }
                        done.fetch_add(1, Ordering::SeqCst);
                    })
                })
                .collect();
            for worker in workers {
                worker.join().unwrap();
            }
            prop_assert_eq!(done.load(Ordering::SeqCst), 2);
        }
    }
}
