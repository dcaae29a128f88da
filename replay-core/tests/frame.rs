use replay_core::{
    device::{FrameState, SubmitInfo},
    hal::{self, soft, Device as _},
    logging::LogItemKind,
    settings::Granularity,
};

use crate::common::{draws, initialize_test, presenting, TestParameters};

fn frames() -> TestParameters {
    TestParameters::default().granularity(Granularity::Frame)
}

#[test]
fn first_submission_opens_the_frame() {
    initialize_test(frames(), |mut ctx| {
        assert_eq!(ctx.queue.frame_state(), FrameState::Idle);
        assert_eq!(ctx.gpu.submission_count(), 0);

        let cmd_buf = draws(1);
        ctx.submit(&[&cmd_buf]).unwrap();

        assert_eq!(ctx.queue.frame_state(), FrameState::Open);
        assert_eq!(ctx.gpu.clock_modes(), vec![hal::ClockMode::Profiling]);
        let submissions = ctx.gpu.submissions();
        assert_eq!(submissions.len(), 2);
        assert!(submissions[0].command_buffers[0].has_session_begin());
        assert_eq!(submissions[1].command_buffers[0].draw_count(), 1);
        assert!(!submissions[1].command_buffers[0].has_session_begin());
    });
}

#[test]
fn present_in_submission_closes_and_reopens_the_frame() {
    initialize_test(frames(), |mut ctx| {
        let (work, present) = (draws(2), presenting(1));
        ctx.submit(&[&work]).unwrap();
        ctx.submit(&[&present]).unwrap();

        let submissions = ctx.gpu.submissions();
        assert_eq!(submissions.len(), 4);
        let closing = &submissions[2];
        assert_eq!(closing.command_buffers.len(), 2);
        assert!(closing.command_buffers[0].has_session_end());
        assert_eq!(closing.command_buffers[0].draw_count(), 0);
        assert!(closing.command_buffers[1]
            .ops
            .iter()
            .any(|op| match *op {
                soft::Op::Present { .. } => true,
                _ => false,
            }));
        assert!(submissions[3].command_buffers[0].has_session_begin());

        assert_eq!(ctx.device.frame_id(), 1);
        assert_eq!(ctx.queue.frame_state(), FrameState::Open);
        assert_eq!(ctx.queue.stats().pending_submissions, 1);
    });
}

#[test]
fn open_frame_defers_reclamation() {
    initialize_test(frames(), |mut ctx| {
        let (a, b) = (draws(1), draws(1));
        ctx.submit(&[&a]).unwrap();
        ctx.submit(&[&b]).unwrap();

        ctx.retire_all();
        let stats = ctx.queue.stats();
        assert_eq!(stats.pending_submissions, 0);
        assert_eq!(stats.command_buffers.busy, 3);
        assert_eq!(stats.sessions.busy, 1);

        ctx.present().unwrap();
        let stats = ctx.queue.stats();
        assert_eq!(stats.pending_submissions, 1);
        // the closing buffer, and the one opening the next frame
        assert_eq!(stats.command_buffers.busy, 5);

        ctx.retire_all();
        let stats = ctx.queue.stats();
        assert_eq!(stats.pending_submissions, 0);
        assert_eq!(stats.command_buffers.busy, 1);
        assert_eq!(stats.command_buffers.available, 4);
        assert_eq!(stats.sessions.busy, 1);
        assert_eq!(stats.sessions.available, 1);
    });
}

#[test]
fn present_swap_chain_brackets_the_present() {
    initialize_test(frames(), |mut ctx| {
        let cmd_buf = draws(1);
        ctx.submit(&[&cmd_buf]).unwrap();
        ctx.present().unwrap();

        assert_eq!(
            ctx.gpu.events(),
            vec![
                soft::QueueEvent::Submit(1),
                soft::QueueEvent::Submit(2),
                soft::QueueEvent::PresentSwapChain(0),
                soft::QueueEvent::Submit(3),
                soft::QueueEvent::Submit(4),
            ]
        );
        let submissions = ctx.gpu.submissions();
        assert!(submissions[2].command_buffers[0].has_session_end());
        assert!(submissions[3].command_buffers[0].has_session_begin());
        assert_eq!(ctx.device.frame_id(), 1);

        ctx.retire_all();
        let records = ctx.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frame, 0);
        assert_eq!(records[0].kind, LogItemKind::Frame);
        assert_eq!(records[0].timing, Some((0, 500)));
    });
}

#[test]
fn failed_frame_end_keeps_the_frame_open() {
    initialize_test(frames(), |mut ctx| {
        let cmd_buf = draws(1);
        ctx.submit(&[&cmd_buf]).unwrap();
        ctx.gpu.fail_recordings(1);
        assert_eq!(ctx.present(), Err(hal::DeviceError::OutOfMemory));
        assert_eq!(ctx.queue.frame_state(), FrameState::Open);
        assert_eq!(ctx.device.frame_id(), 0);

        ctx.present().unwrap();
        assert_eq!(ctx.device.frame_id(), 1);
        let submissions = ctx.gpu.submissions();
        assert!(submissions[2].command_buffers[0].has_session_end());

        ctx.retire_all();
        let records = ctx.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frame, 0);
        assert_eq!(records[0].kind, LogItemKind::Frame);
        assert_eq!(records[0].timing, Some((0, 500)));
    });
}

#[test]
fn present_direct_finishes_the_frame() {
    initialize_test(frames(), |mut ctx| {
        let image = unsafe {
            ctx.device
                .raw()
                .create_memory(&hal::MemoryDescriptor {
                    label: Some("image"),
                    size: 0x10000,
                    alignment: 0x1000,
                    heap: hal::GpuHeap::Local,
                })
                .unwrap()
        };
        let cmd_buf = draws(1);
        ctx.submit(&[&cmd_buf]).unwrap();
        ctx.queue
            .present_direct(&hal::PresentDirectInfo {
                src_image: &image,
                mode: hal::PresentMode::Windowed,
            })
            .unwrap();

        assert_eq!(ctx.device.frame_id(), 1);
        assert_eq!(ctx.gpu.events()[2], soft::QueueEvent::PresentDirect);
        assert_eq!(ctx.gpu.submission_count(), 4);
        unsafe { ctx.device.raw().destroy_memory(image) };
    });
}

#[test]
fn closing_buffer_gets_a_placeholder_info() {
    initialize_test(frames(), |mut ctx| {
        let present = presenting(1);
        let infos = [hal::CommandBufferInfo {
            is_valid: true,
            ..hal::CommandBufferInfo::placeholder()
        }];
        ctx.queue
            .submit(&SubmitInfo {
                command_buffers: &[&present],
                command_buffer_infos: Some(&infos[..]),
                memory_refs: &[],
                fence: None,
            })
            .unwrap();

        let submissions = ctx.gpu.submissions();
        assert_eq!(submissions.len(), 3);
        assert_eq!(submissions[0].infos, None);
        assert_eq!(submissions[1].infos, Some(vec![false, true]));
        assert_eq!(submissions[2].infos, None);
    });
}

#[test]
fn frames_outside_the_window_are_not_sampled() {
    let parameters = frames().settings(|settings| {
        settings.start_frame = 1;
        settings.frame_count = Some(1);
    });
    initialize_test(parameters, |mut ctx| {
        let cmd_buf = draws(1);
        ctx.submit(&[&cmd_buf]).unwrap();
        assert_eq!(ctx.queue.frame_state(), FrameState::Idle);
        assert_eq!(ctx.gpu.submission_count(), 1);
        assert_eq!(ctx.queue.stats().pending_submissions, 1);
        assert!(ctx.gpu.clock_modes().is_empty());

        ctx.present().unwrap();
        assert_eq!(ctx.queue.frame_state(), FrameState::Open);
        assert_eq!(ctx.gpu.clock_modes(), vec![hal::ClockMode::Profiling]);

        ctx.submit(&[&cmd_buf]).unwrap();
        ctx.present().unwrap();
        assert_eq!(ctx.device.frame_id(), 2);
        assert_eq!(ctx.queue.frame_state(), FrameState::Idle);
        assert_eq!(
            ctx.gpu.clock_modes(),
            vec![hal::ClockMode::Profiling, hal::ClockMode::Default]
        );

        ctx.retire_all();
        let records = ctx.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frame, 1);
        let stats = ctx.queue.stats();
        assert_eq!(stats.pending_submissions, 0);
        assert_eq!(stats.command_buffers.busy, 0);
    });
}

#[test]
fn draw_sampling_restores_clocks_after_the_window() {
    let parameters = TestParameters::default().settings(|settings| settings.frame_count = Some(1));
    initialize_test(parameters, |mut ctx| {
        let cmd_buf = draws(1);
        ctx.submit(&[&cmd_buf]).unwrap();
        assert_eq!(ctx.queue.frame_state(), FrameState::Idle);
        ctx.present().unwrap();
        ctx.submit(&[&cmd_buf]).unwrap();

        assert_eq!(
            ctx.gpu.clock_modes(),
            vec![hal::ClockMode::Profiling, hal::ClockMode::Default]
        );
        let submissions = ctx.gpu.submissions();
        assert!(submissions[0].command_buffers[0].has_session_begin());
        assert!(!submissions[1].command_buffers[0].has_session_begin());
    });
}
