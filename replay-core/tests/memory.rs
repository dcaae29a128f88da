use std::sync::Arc;

use replay_core::{
    command::RecordedCommandBuffer,
    device::{QueueSubmitError, WaitIdleError},
    hal::{self, soft::Allocation},
    settings::Granularity,
    DeviceError,
};

use crate::common::{draws, initialize_test, TestParameters, TestingContext};

const ALL_ALLOCATIONS: [Allocation; 6] = [
    Allocation::CommandAllocator,
    Allocation::CommandBuffer,
    Allocation::Fence,
    Allocation::Memory,
    Allocation::QuerySet,
    Allocation::SamplingSession,
];

#[test]
fn out_of_memory_drains_the_queue_and_retries() {
    initialize_test(TestParameters::default().no_sampling(), |mut ctx| {
        let (a, b) = (draws(1), draws(1));
        ctx.submit(&[&a]).unwrap();
        ctx.gpu.fail_allocations(Allocation::CommandBuffer, 1);
        ctx.submit(&[&b]).unwrap();

        assert!(ctx
            .gpu
            .events()
            .contains(&hal::soft::QueueEvent::WaitIdle));
        assert_eq!(ctx.gpu.live_objects(Allocation::CommandBuffer), 1);
        let stats = ctx.queue.stats();
        assert_eq!(stats.command_buffers.busy, 1);
        assert_eq!(stats.pending_submissions, 1);
        assert_eq!(ctx.gpu.submission_count(), 2);
    });
}

#[test]
fn out_of_memory_after_draining_is_reported() {
    initialize_test(TestParameters::default().no_sampling(), |mut ctx| {
        ctx.gpu.fail_allocations(Allocation::CommandBuffer, 2);
        let cmd_buf = draws(1);
        match ctx.submit(&[&cmd_buf]) {
            Err(QueueSubmitError::Device(DeviceError::OutOfMemory)) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(ctx.gpu.submission_count(), 0);

        ctx.submit(&[&cmd_buf]).unwrap();
        assert_eq!(ctx.gpu.submission_count(), 1);
    });
}

#[test]
fn query_memory_failure_is_reported() {
    let parameters = TestParameters::default().settings(|settings| settings.pipeline_stats = true);
    initialize_test(parameters, |mut ctx| {
        ctx.gpu.fail_allocations(Allocation::Memory, 2);
        let cmd_buf = draws(1);
        match ctx.submit(&[&cmd_buf]) {
            Err(QueueSubmitError::Device(DeviceError::OutOfGpuMemory)) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(ctx.gpu.bound_query_sets(), 0);
        assert_eq!(ctx.device.memory_counters().allocation_count(), 0);
    });
}

#[test]
fn query_memory_is_counted_until_teardown() {
    let parameters = TestParameters::default().settings(|settings| settings.pipeline_stats = true);
    initialize_test(parameters, |mut ctx| {
        let cmd_buf = draws(3);
        ctx.submit(&[&cmd_buf]).unwrap();
        ctx.retire_all();
        ctx.submit(&[&cmd_buf]).unwrap();

        let counters = ctx.device.memory_counters();
        assert_eq!(counters.allocation_count(), 1);
        assert_eq!(
            counters.heap_bytes(hal::GpuHeap::GartCacheable),
            4 * 1024 * 1024
        );
        assert_eq!(ctx.gpu.live_objects(Allocation::Memory), 1);
        assert_eq!(ctx.gpu.live_objects(Allocation::QuerySet), 3);

        let TestingContext { device, gpu, queue, .. } = ctx;
        drop(queue);
        assert_eq!(device.memory_counters().allocation_count(), 0);
        assert_eq!(device.memory_counters().heap_bytes(hal::GpuHeap::GartCacheable), 0);
        assert_eq!(gpu.live_objects(Allocation::Memory), 0);
    });
}

#[test]
fn teardown_with_an_open_frame_releases_everything() {
    let parameters = TestParameters::default().granularity(Granularity::Frame);
    initialize_test(parameters, |mut ctx| {
        let cmd_buf = draws(2);
        ctx.submit(&[&cmd_buf]).unwrap();
        ctx.present().unwrap();
        ctx.submit(&[&cmd_buf]).unwrap();

        let TestingContext { gpu, queue, log, .. } = ctx;
        drop(queue);
        for &allocation in ALL_ALLOCATIONS.iter() {
            assert_eq!(gpu.live_objects(allocation), 0, "{:?} leaked", allocation);
        }
        // only the closed frame is reported
        assert_eq!(log.records().unwrap().len(), 1);
    });
}

#[test]
fn teardown_with_work_in_flight_releases_everything() {
    let parameters = TestParameters::default().settings(|settings| settings.pipeline_stats = true);
    initialize_test(parameters, |mut ctx| {
        let mut nested = RecordedCommandBuffer::new_nested(Some("nested"));
        nested.dispatch([1, 1, 1]);
        let mut primary = draws(2);
        primary.execute_nested(vec![Arc::new(nested)]);
        ctx.submit(&[&primary]).unwrap();
        ctx.submit(&[&primary]).unwrap();
        assert_eq!(ctx.queue.stats().pending_submissions, 2);

        let TestingContext { gpu, queue, log, .. } = ctx;
        drop(queue);
        for &allocation in ALL_ALLOCATIONS.iter() {
            assert_eq!(gpu.live_objects(allocation), 0, "{:?} leaked", allocation);
        }
        assert_eq!(gpu.bound_query_sets(), 0);
        // a submit call and two draws per submission
        assert_eq!(log.records().unwrap().len(), 6);
    });
}

#[test]
fn lost_device_leaves_submissions_pending() {
    initialize_test(TestParameters::default().no_sampling(), |mut ctx| {
        let cmd_buf = draws(1);
        ctx.submit(&[&cmd_buf]).unwrap();
        ctx.gpu.set_lost(true);

        ctx.queue.process_idle_submits();
        assert_eq!(ctx.queue.stats().pending_submissions, 1);
        match ctx.queue.wait_idle() {
            Err(WaitIdleError::StuckGpu(1)) => {}
            other => panic!("unexpected result {:?}", other),
        }
        match ctx.submit(&[&cmd_buf]) {
            Err(QueueSubmitError::Device(DeviceError::Lost)) => {}
            other => panic!("unexpected result {:?}", other),
        }

        ctx.gpu.set_lost(false);
        ctx.queue.wait_idle().unwrap();
        let stats = ctx.queue.stats();
        assert_eq!(stats.command_buffers.busy, 1);
        assert_eq!(stats.fences.busy, 0);
    });
}

#[test]
fn failed_fence_creation_forwards_nothing() {
    initialize_test(TestParameters::default().no_sampling(), |mut ctx| {
        ctx.gpu.fail_allocations(Allocation::Fence, 2);
        let cmd_buf = draws(1);
        match ctx.submit(&[&cmd_buf]) {
            Err(QueueSubmitError::Device(DeviceError::OutOfMemory)) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(ctx.gpu.submission_count(), 0);

        ctx.submit(&[&cmd_buf]).unwrap();
        assert_eq!(ctx.gpu.submission_count(), 1);
        let stats = ctx.queue.stats();
        assert_eq!(stats.pending_submissions, 1);
        assert_eq!(stats.fences.busy, 1);
    });
}

#[test]
fn lost_device_at_teardown_leaks_query_memory() {
    let parameters = TestParameters::default()
        .granularity(Granularity::Draw)
        .settings(|settings| settings.pipeline_stats = true);
    initialize_test(parameters, |mut ctx| {
        // one more draw than a single block holds queries for
        let cmd_buf = draws(16385);
        ctx.submit(&[&cmd_buf]).unwrap();
        assert_eq!(ctx.gpu.live_objects(Allocation::Memory), 2);
        ctx.gpu.set_lost(true);

        let TestingContext { gpu, queue, log, .. } = ctx;
        drop(queue);
        assert_eq!(gpu.live_objects(Allocation::Memory), 2);
        assert_ne!(gpu.live_objects(Allocation::Fence), 0);
        assert!(log.records().unwrap().is_empty());
    });
}
