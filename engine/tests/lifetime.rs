use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use emugpu_engine::graphics::*;
use emugpu_null::{NullBackend, NullDevice, NullDeviceInfo};

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct NoopFlusher;

impl CommandFlusher for NoopFlusher {
    fn flush_all_commands(&self) {}
}

fn graphics_device(info: NullDeviceInfo, settings: GraphicsSettings) -> (Arc<NullDevice>, GraphicsDevice<NullBackend>) {
    let device = Arc::new(NullDevice::new(info));
    let graphics = GraphicsDevice::new(&device, Arc::new(NoopFlusher), settings).unwrap();
    (device, graphics)
}

#[test]
fn handle_outlives_every_slot_that_used_it() {
    let (device, graphics) = graphics_device(NullDeviceInfo::default(), GraphicsSettings::default());
    let drops = Arc::new(AtomicUsize::new(0));
    let handle = graphics.create_resource(DropCounter(drops.clone()));
    assert_eq!(handle.reference_count(), 1);

    let mut slot0 = graphics.rent_command_buffer().unwrap();
    handle.register_use(&mut slot0);
    assert_eq!(handle.reference_count(), 2);
    let mut slot1 = graphics.rent_command_buffer().unwrap();
    handle.register_use(&mut slot1);
    assert_eq!(handle.reference_count(), 3);

    graphics.submit(slot0).unwrap();
    graphics.submit(slot1).unwrap();

    device.complete_next();
    graphics.maintain();
    assert_eq!(handle.reference_count(), 2);
    device.complete_next();
    graphics.maintain();
    assert_eq!(handle.reference_count(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    handle.release();
    assert_eq!(handle.reference_count(), 0);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn freed_range_is_reused_before_growing() {
    let settings = GraphicsSettings {
        memory: MemoryArenaSettings {
            block_alignment: 1 << 20,
            ..Default::default()
        },
        ..Default::default()
    };
    let (device, graphics) = graphics_device(NullDeviceInfo::default(), settings);
    let requirements = |size| gpu::ResourceHeapInfo {
        memory_type_mask: 1 << 1,
        alignment: 256,
        size,
    };

    let a = graphics.allocate_memory(MemoryUsage::MainMemoryWriteCombined, &requirements(300 * 1024)).unwrap();
    let b = graphics.allocate_memory(MemoryUsage::MainMemoryWriteCombined, &requirements(300 * 1024)).unwrap();
    let c = graphics.allocate_memory(MemoryUsage::MainMemoryWriteCombined, &requirements(300 * 1024)).unwrap();
    assert_eq!((a.offset(), b.offset(), c.offset()), (0, 300 * 1024, 600 * 1024));
    drop(b);

    let d = graphics.allocate_memory(MemoryUsage::MainMemoryWriteCombined, &requirements(250 * 1024)).unwrap();
    assert_eq!(d.offset(), 300 * 1024);
    assert!(Arc::ptr_eq(a.block(), d.block()));
    assert_eq!(device.live_heap_count(), 1);
}

#[test]
fn fence_backed_sync_point_times_out_without_failing() {
    let settings = GraphicsSettings {
        sync_points: SyncPointSettings {
            wait_timeout_ms: 100,
            ..Default::default()
        },
        ..Default::default()
    };
    let info = NullDeviceInfo {
        supports_timeline_semaphores: false,
        ..Default::default()
    };
    let (device, graphics) = graphics_device(info, settings);
    let sync_points = graphics.sync_points();
    assert!(!sync_points.uses_timeline_semaphore());

    sync_points.create(5, true).unwrap();
    let start = Instant::now();
    assert!(!sync_points.wait(5));
    assert!(start.elapsed() >= Duration::from_millis(100));

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(20));
            device.complete_all();
        });
        assert!(sync_points.wait(5));
    });
    assert_eq!(sync_points.get_current(), 5);
}

#[test]
fn buffer_hazards_are_tracked_per_slot() {
    let (device, graphics) = graphics_device(NullDeviceInfo::default(), GraphicsSettings::default());
    let buffer = graphics.create_buffer_resource(0u32, 1 << 16);
    let waitable = buffer.waitable().unwrap().clone();

    let mut writer = graphics.rent_command_buffer().unwrap();
    let writer_index = writer.index();
    let _ = buffer.get_range_for(&mut writer, 0, 4096, true);
    graphics.submit(writer).unwrap();

    assert!(waitable.overlaps_with(UsageScope::All, 100, 4, false));
    assert!(waitable.overlaps_with(UsageScope::Slot(writer_index), 0, 1, true));
    assert!(!waitable.overlaps_with(UsageScope::All, 8192, 4096, false));
    assert!(!waitable.wait_for_fences(Some((0, 4096)), Some(Duration::ZERO)));
    assert!(waitable.wait_for_fences(Some((8192, 4096)), Some(Duration::ZERO)));

    device.complete_all();
    assert!(waitable.wait_for_fences(Some((0, 4096)), Some(Duration::ZERO)));
    graphics.maintain();
    assert!(!waitable.overlaps_with(UsageScope::All, 0, 4096, false));
    buffer.release();
    assert!(buffer.is_destroyed());
}

#[test]
fn concurrent_recording_and_retirement() {
    const THREADS: usize = 4;
    const ITERATIONS: usize = 200;

    let settings = GraphicsSettings {
        command_buffer_pool: CommandBufferPoolSettings {
            initial_capacity: 2,
            growth_factor: 2,
            max_capacity: 8,
        },
        ..Default::default()
    };
    let info = NullDeviceInfo {
        auto_complete: true,
        ..Default::default()
    };
    let (_device, graphics) = graphics_device(info, settings);
    let drops = Arc::new(AtomicUsize::new(0));
    let shared = graphics.create_resource(DropCounter(drops.clone()));

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for i in 0..ITERATIONS {
                    let mut recorder = graphics.rent_command_buffer().unwrap();
                    shared.register_use(&mut recorder);
                    let local = graphics.create_resource(i);
                    local.register_use(&mut recorder);
                    local.release();
                    assert!(!local.is_destroyed());
                    graphics.submit(recorder).unwrap();
                    if i % 16 == 0 {
                        graphics.maintain();
                    }
                }
            });
        }
    });

    graphics.wait_idle();
    assert!(graphics.command_pool().capacity() <= 8);
    assert_eq!(graphics.command_pool().in_flight(), 0);
    assert_eq!(shared.reference_count(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    shared.release();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn partial_settings_deserialize_with_defaults() {
    let json = r#"{
        "command_buffer_pool": { "max_capacity": 16 },
        "sync_points": { "wait_timeout_ms": 250 }
    }"#;
    let settings: GraphicsSettings = serde_json::from_str(json).unwrap();
    assert_eq!(settings.command_buffer_pool.max_capacity, 16);
    assert_eq!(settings.command_buffer_pool.initial_capacity, 8);
    assert_eq!(settings.sync_points.wait_timeout(), Duration::from_millis(250));
    assert!(settings.sync_points.prefer_timeline_semaphores);
    assert_eq!(settings.buffer_usage.granularity, 4096);
    assert_eq!(settings.memory, MemoryArenaSettings::default());

    let round_trip: GraphicsSettings = serde_json::from_str(&serde_json::to_string(&settings).unwrap()).unwrap();
    assert_eq!(round_trip, settings);
}
