use std::fs;

use replay_core::{
    command::CallId,
    hal::{self, soft},
    logging::{LogItemKind, LogRecord, QueueCallId},
    settings::{GlobalCounter, Granularity},
};

use crate::common::{draws, initialize_test, TestParameters};

fn draw(command_buffer: u64, index: u32) -> LogItemKind {
    LogItemKind::DrawOrDispatch {
        call: CallId::Draw,
        command_buffer,
        index,
    }
}

fn busy_counter() -> GlobalCounter {
    GlobalCounter {
        name: "busy".to_string(),
        block: 1,
        event_id: 5,
    }
}

#[test]
fn records_are_flushed_once_after_retirement() {
    initialize_test(TestParameters::default(), |mut ctx| {
        let cmd_buf = draws(2);
        ctx.submit(&[&cmd_buf]).unwrap();
        assert!(ctx.records().is_empty());
        assert_eq!(ctx.queue.stats().queued_log_items, 3);

        ctx.retire_all();
        let records = ctx.records();
        let kinds = records.iter().map(|record| record.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![LogItemKind::QueueCall(QueueCallId::Submit), draw(0, 0), draw(0, 1)]
        );
        assert_eq!(records[0].timing, None);
        assert_eq!(records[1].timing, Some((0, 500)));
        assert_eq!(records[2].timing, Some((1000, 1500)));
        assert_eq!(records[1].counters, None);

        ctx.queue.process_idle_submits();
        assert_eq!(ctx.records().len(), 3);
        let stats = ctx.queue.stats();
        assert_eq!(stats.flushed_log_items, 3);
        assert_eq!(stats.queued_log_items, 0);
    });
}

#[test]
fn records_follow_submission_order() {
    initialize_test(TestParameters::default(), |mut ctx| {
        let (a, b) = (draws(1), draws(1));
        ctx.submit(&[&a]).unwrap();
        ctx.submit(&[&b]).unwrap();

        ctx.gpu.retire(2);
        ctx.queue.process_idle_submits();
        assert!(ctx.records().is_empty());

        ctx.gpu.retire(1);
        ctx.queue.process_idle_submits();
        let kinds = ctx
            .records()
            .into_iter()
            .map(|record| record.kind)
            .collect::<Vec<_>>();
        let submit = LogItemKind::QueueCall(QueueCallId::Submit);
        assert_eq!(kinds, vec![submit, draw(0, 0), submit, draw(1, 0)]);
    });
}

#[test]
fn counters_are_summed_over_instances() {
    let parameters = TestParameters::default()
        .settings(|settings| settings.global_perf_counters = vec![busy_counter()]);
    initialize_test(parameters, |mut ctx| {
        assert_eq!(ctx.queue.sample_config().ty, hal::SampleType::Cumulative);
        assert_eq!(ctx.queue.sample_config().counters.len(), 3);
        assert_eq!(ctx.queue.reported_counter_count(), 1);

        let cmd_buf = draws(2);
        ctx.submit(&[&cmd_buf]).unwrap();
        ctx.retire_all();

        let records = ctx.records();
        assert_eq!(records[0].counters, None);
        assert_eq!(records[1].counters, Some(vec![3]));
        assert_eq!(records[1].timing, Some((1000, 1500)));
        assert_eq!(records[2].counters, Some(vec![603]));
        assert_eq!(records[2].timing, Some((3000, 3500)));
    });
}

#[test]
fn counters_can_be_reported_per_instance() {
    let parameters = TestParameters::default().settings(|settings| {
        settings.global_perf_counters = vec![busy_counter()];
        settings.global_perf_counter_per_instance = true;
    });
    initialize_test(parameters, |mut ctx| {
        assert_eq!(ctx.queue.reported_counter_count(), 3);
        let cmd_buf = draws(1);
        ctx.submit(&[&cmd_buf]).unwrap();
        ctx.retire_all();
        assert_eq!(ctx.records()[1].counters, Some(vec![0, 1, 2]));
    });
}

#[test]
fn trace_size_is_reported() {
    let parameters = TestParameters::default().settings(|settings| {
        settings.trace.enabled = true;
        settings.trace.buffer_size = 0x1000;
    });
    initialize_test(parameters, |mut ctx| {
        let cmd_buf = draws(1);
        ctx.submit(&[&cmd_buf]).unwrap();
        ctx.retire_all();

        let records = ctx.records();
        assert_eq!(records[1].trace_size, Some(0x2000));
        assert_eq!(records[1].counters, None);
    });
}

#[test]
fn command_buffers_are_sampled_as_a_whole() {
    let parameters = TestParameters::default().granularity(Granularity::CmdBuf);
    initialize_test(parameters, |mut ctx| {
        let (a, b) = (draws(2), draws(1));
        ctx.submit(&[&a, &b]).unwrap();

        let submissions = ctx.gpu.submissions();
        let samples = submissions[0].command_buffers[0]
            .ops
            .iter()
            .filter(|op| match **op {
                soft::Op::BeginSample { .. } => true,
                _ => false,
            })
            .count();
        assert_eq!(samples, 1);

        ctx.retire_all();
        let records = ctx.records();
        let kinds = records.iter().map(|record| record.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                LogItemKind::QueueCall(QueueCallId::Submit),
                LogItemKind::CommandBuffer(0),
                LogItemKind::CommandBuffer(1),
            ]
        );
        assert_eq!(records[1].timing, Some((0, 500)));
        assert_eq!(records[2].timing, Some((0, 500)));
    });
}

#[test]
fn pipeline_statistics_are_collected_per_draw() {
    let parameters = TestParameters::default().settings(|settings| settings.pipeline_stats = true);
    initialize_test(parameters, |mut ctx| {
        let cmd_buf = draws(2);
        ctx.submit(&[&cmd_buf]).unwrap();
        assert_eq!(ctx.gpu.bound_query_sets(), 2);
        assert_eq!(ctx.queue.stats().query_sets.busy, 2);

        let submissions = ctx.gpu.submissions();
        let ops = &submissions[0].command_buffers[0].ops;
        let draw_at = ops
            .iter()
            .position(|op| match *op {
                soft::Op::Draw { .. } => true,
                _ => false,
            })
            .unwrap();
        match (&ops[draw_at - 1], &ops[draw_at + 1]) {
            (&soft::Op::BeginQuery(begin), &soft::Op::EndQuery(end)) => assert_eq!(begin, end),
            other => panic!("draw is not bracketed by a query: {:?}", other),
        }

        ctx.retire_all();
        let stats = ctx
            .records()
            .into_iter()
            .filter_map(|record| record.pipeline_stats)
            .map(|stats| stats.ps_invocations)
            .collect::<Vec<_>>();
        assert_eq!(stats, vec![1, 0x101]);
        assert_eq!(ctx.gpu.bound_query_sets(), 0);
        assert_eq!(ctx.queue.stats().query_sets.available, 2);
    });
}

#[test]
fn queue_calls_are_logged_in_order() {
    initialize_test(TestParameters::default(), |mut ctx| {
        let semaphore = soft::Resource(3);
        ctx.queue.signal_semaphore(&semaphore).unwrap();
        ctx.queue.wait_semaphore(&semaphore).unwrap();
        ctx.queue.delay(0.5).unwrap();
        ctx.submit(&[]).unwrap();
        ctx.retire_all();

        let kinds = ctx
            .records()
            .into_iter()
            .map(|record| record.kind)
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                LogItemKind::QueueCall(QueueCallId::SignalSemaphore),
                LogItemKind::QueueCall(QueueCallId::WaitSemaphore),
                LogItemKind::QueueCall(QueueCallId::Delay),
                LogItemKind::QueueCall(QueueCallId::Submit),
            ]
        );
    });
}

#[test]
fn queue_log_is_written_into_the_log_directory() {
    let directory = std::env::temp_dir().join(format!("replay-core-log-{}", std::process::id()));
    fs::create_dir_all(&directory).unwrap();
    let parameters =
        TestParameters::default().settings(|settings| settings.log_directory = Some(directory.clone()));
    initialize_test(parameters, |ctx| {
        let mut queue = ctx.device.create_queue(hal::QueueType::Compute).unwrap();
        assert_eq!(queue.index(), 1);
        let cmd_buf = draws(1);
        queue
            .submit(&replay_core::device::SubmitInfo {
                command_buffers: &[&cmd_buf],
                command_buffer_infos: None,
                memory_refs: &[],
                fence: None,
            })
            .unwrap();
        drop(queue);
    });

    let text = fs::read_to_string(directory.join("queue1.ron")).unwrap();
    let records: Vec<LogRecord> = ron::de::from_str(&text).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].kind, draw(0, 0));
    let _ = fs::remove_dir_all(&directory);
}
