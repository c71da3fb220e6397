//! Framing engine behavior against a simulated device on a paused clock

use ameba_link::core::simulator::SimulatedDevice;
use ameba_link::{Command, CompletionPolicy, Pattern, ResponseCollector, ResponseStatus, TransportKind};
use std::time::Duration;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn scan_policy() -> CompletionPolicy {
    CompletionPolicy::idle_after_records(ms(1500))
}

#[tokio::test(start_paused = true)]
async fn test_prompt_reply_in_two_reads() {
    let mut device = SimulatedDevice::serial().on_command("AT", vec![(ms(15), "OK\r\n"), (ms(40), "#")]);

    let result = ResponseCollector::new()
        .send_and_collect(&mut device, &Command::new("AT"), &CompletionPolicy::prompt(), ms(2000))
        .await;

    assert_eq!(result.status, ResponseStatus::Success);
    assert_eq!(result.text, "OK");
    assert_eq!(result.transport, TransportKind::Serial);
    assert_eq!(result.elapsed, ms(40));
}

#[tokio::test(start_paused = true)]
async fn test_collect_until_keeps_grace_bytes() {
    let mut device = SimulatedDevice::tcp().on_command(
        "ATWS",
        vec![
            (ms(50), "_SCAN_\n1\tAA\tBB\n"),
            (ms(3050), "2\tCC\tDD\ndone!\n"),
            (ms(3350), "\n"),
        ],
    );
    let policy = CompletionPolicy::collect_until(Pattern::literal("_SCAN_"), Pattern::literal("done!"));

    let result = ResponseCollector::new()
        .send_and_collect(&mut device, &Command::new("ATWS"), &policy, ms(15_000))
        .await;

    assert_eq!(result.status, ResponseStatus::Success);
    assert!(result.text.contains("1\tAA\tBB\n"));
    assert!(result.text.contains("2\tCC\tDD\n"));
    assert!(result.text.ends_with("done!\n\n"));
    assert_eq!(result.elapsed, ms(3350));
}

#[tokio::test(start_paused = true)]
async fn test_grace_read_is_bounded() {
    let mut device = SimulatedDevice::serial().on_command("ATWS", vec![(ms(100), "_SCAN_\n1\tA\ndone!")]);
    let policy = CompletionPolicy::collect_until(Pattern::literal("_SCAN_"), Pattern::literal("done!"));

    let result = ResponseCollector::new()
        .send_and_collect(&mut device, &Command::new("ATWS"), &policy, ms(15_000))
        .await;

    assert!(result.is_success());
    assert_eq!(result.text, "_SCAN_\n1\tA\ndone!");
    assert_eq!(result.elapsed, ms(600));
}

#[tokio::test(start_paused = true)]
async fn test_idle_scan_finishes_early() {
    let mut device = SimulatedDevice::serial().on_command(
        "ATWS",
        vec![
            (ms(100), "ATWS\r\n1\tInfra\t00:e0:4c:00:00:01\t-40\tHome\r\n"),
            (ms(1000), "2\tInfra\t00:e0:4c:00:00:02\t-61\tOffice\r\n"),
            (ms(2000), "3\tInfra\t00:e0:4c:00:00:03\t-77\tCafe\r\n"),
            (ms(2600), "[MEM] After do cmd, available heap 98304\r\n"),
            (ms(3200), "[MEM] After do cmd, available heap 98304\r\n"),
        ],
    );

    let result = ResponseCollector::new()
        .send_and_collect(&mut device, &Command::new("ATWS"), &scan_policy(), ms(60_000))
        .await;

    assert_eq!(result.status, ResponseStatus::Success);
    assert_eq!(result.matches, 3);
    // Keepalive noise after the last record does not extend the scan
    assert_eq!(result.elapsed, ms(3500));
    assert!(result.text.contains("Cafe"));
}

#[tokio::test(start_paused = true)]
async fn test_idle_scan_settled_at_budget() {
    let mut device = SimulatedDevice::tcp().on_command("ATWS", vec![(ms(100), "1\tInfra\tAA\t-40\tHome\n")]);

    let result = ResponseCollector::new()
        .send_and_collect(&mut device, &Command::new("ATWS"), &scan_policy(), ms(1000))
        .await;

    assert_eq!(result.status, ResponseStatus::Success);
    assert_eq!(result.matches, 1);
    assert_eq!(result.elapsed, ms(1000));
}

#[tokio::test(start_paused = true)]
async fn test_idle_scan_without_records_times_out() {
    let mut device = SimulatedDevice::tcp().on_command("ATWS", vec![(ms(100), "[ATWS] scanning...\n")]);

    let result = ResponseCollector::new()
        .send_and_collect(&mut device, &Command::new("ATWS"), &scan_policy(), ms(5000))
        .await;

    assert_eq!(result.status, ResponseStatus::Timeout);
    assert_eq!(result.matches, 0);
    assert_eq!(result.text, "[ATWS] scanning...\n");
}

#[tokio::test(start_paused = true)]
async fn test_marker_split_across_reads() {
    let mut device = SimulatedDevice::serial().on_command(
        "SNAP=SNAPS",
        vec![(ms(200), "[SNAP] capture_snaps"), (ms(900), "hot_cb: sd:/IMAGE/7.jpg\r\n")],
    );
    let policy = CompletionPolicy::wait_for(Pattern::literal("capture_snapshot_cb"));

    let result = ResponseCollector::new()
        .send_and_collect(&mut device, &Command::new("SNAP=SNAPS"), &policy, ms(10_000))
        .await;

    assert!(result.is_success());
    assert_eq!(result.elapsed, ms(900));
}

#[tokio::test(start_paused = true)]
async fn test_stale_output_is_drained() {
    let mut device = SimulatedDevice::serial().on_command("ATW?", vec![(ms(30), "AP: Home\r\n#")]);
    device.inject_now("2\tleftover\tfrom\tscan\r\n");
    device.inject_now("[MEM] heap\r\n#");

    let result = ResponseCollector::new()
        .send_and_collect(&mut device, &Command::new("ATW?"), &CompletionPolicy::prompt(), ms(3000))
        .await;

    assert!(result.is_success());
    assert_eq!(result.text, "AP: Home");
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_never_exceeds_budget_by_a_poll() {
    let policies = [
        CompletionPolicy::prompt(),
        CompletionPolicy::wait_for(Pattern::literal("never")),
        CompletionPolicy::collect_until(Pattern::literal("a"), Pattern::literal("b")),
        scan_policy(),
    ];

    for policy in &policies {
        for budget in [ms(1), ms(333), ms(2000), ms(7777)] {
            let mut device = SimulatedDevice::serial();
            let result = ResponseCollector::new()
                .send_and_collect(&mut device, &Command::new("AT"), policy, budget)
                .await;

            assert_eq!(result.status, ResponseStatus::Timeout, "{}", policy.label());
            assert!(result.elapsed >= budget);
            assert!(result.elapsed <= budget + policy.poll_interval(), "{}", policy.label());
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_command_is_terminated_once() {
    let mut device = SimulatedDevice::serial();
    let monitor = device.monitor();
    let collector = ResponseCollector::new();

    for text in ["AT", "AT\r\n", "AT\n"] {
        collector
            .send_and_collect(&mut device, &Command::new(text), &CompletionPolicy::prompt(), ms(100))
            .await;
    }

    assert_eq!(monitor.written(), vec!["AT\r\n"; 3]);
}

#[tokio::test(start_paused = true)]
async fn test_idle_scan_with_uneven_gaps() {
    let gaps = [100, 150, 1050, 100, 1300];
    let mut at = 0;
    let mut chunks = Vec::new();
    let lines: Vec<String> = (1..=gaps.len())
        .map(|n| format!("{}\tInfra\t00:e0:4c:00:00:{:02}\t-5{}\tNet{}\r\n", n, n, n, n))
        .collect();
    for (gap, line) in gaps.iter().zip(&lines) {
        at += gap;
        chunks.push((ms(at), line.as_str()));
        chunks.push((ms(at + 40), "[MEM] After do cmd, available heap 98304\r\n"));
    }
    let last_record = ms(at);
    let policy = scan_policy();
    let mut device = SimulatedDevice::serial().on_command("ATWS", chunks);

    let result = ResponseCollector::new()
        .send_and_collect(&mut device, &Command::new("ATWS"), &policy, ms(60_000))
        .await;

    assert_eq!(result.status, ResponseStatus::Success);
    assert_eq!(result.matches, gaps.len());
    assert!(result.elapsed >= last_record);
    assert!(result.elapsed < last_record + ms(1500) + policy.poll_interval());
}

#[tokio::test(start_paused = true)]
async fn test_record_split_across_reads_counts_once() {
    let mut device = SimulatedDevice::tcp().on_command(
        "ATWS",
        vec![
            (ms(100), "ATWS\r\n1"),
            (ms(300), "\tInfra\tAA\t-40\tHome\r\n2\tInfra\tBB"),
            (ms(600), "\t-70\tCafe\r\n"),
        ],
    );

    let result = ResponseCollector::new()
        .send_and_collect(&mut device, &Command::new("ATWS"), &scan_policy(), ms(15_000))
        .await;

    assert_eq!(result.status, ResponseStatus::Success);
    assert_eq!(result.matches, 2);
    assert!(result.text.ends_with("2\tInfra\tBB\t-70\tCafe\r\n"));
    // The tail of record 2 is not a new record, so the idle clock runs from 300 ms
    assert_eq!(result.elapsed, ms(1800));
}
