#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use ikigai_protocol::Instruction;

use crate::queue::{InstructionQueues, QueueConfig};
use crate::test_support::{RecordingHandler, eventually, text, user};

fn queues() -> (InstructionQueues, Arc<RecordingHandler>) {
	let handler = Arc::new(RecordingHandler::default());
	(InstructionQueues::new(handler.clone(), QueueConfig::default()), handler)
}

fn labels(n: usize) -> Vec<String> {
	(0..n).map(|i| format!("m{i}")).collect()
}

#[tokio::test]
async fn instructions_run_in_enqueue_order() {
	let (queues, handler) = queues();
	let u = user("1");
	// The first instruction is slow so the rest pile up behind it.
	handler.delay("m0", Duration::from_millis(40));

	for label in labels(20) {
		queues.add_response_to_queue(&u, text(&label));
	}

	assert!(eventually(Duration::from_secs(1), || handler.labels(&u).len() == 20).await);
	assert_eq!(handler.labels(&u), labels(20));
	assert_eq!(handler.max_active.lock().get(&u).copied(), Some(1));
	assert_eq!(queues.len(), 1);
}

#[tokio::test]
async fn slow_user_does_not_block_others() {
	let (queues, handler) = queues();
	let slow = user("slow");
	let fast = user("fast");
	handler.delay("stall", Duration::from_millis(300));

	queues.add_response_to_queue(&slow, text("stall"));
	queues.add_response_to_queue(&slow, text("after stall"));
	queues.add_response_to_queue(&fast, text("a"));
	queues.add_response_to_queue(&fast, text("b"));

	assert!(eventually(Duration::from_millis(150), || handler.labels(&fast).len() == 2).await);
	assert!(handler.labels(&slow).is_empty());
	assert_eq!(queues.queue_depth(&slow), 1);

	assert!(eventually(Duration::from_secs(1), || handler.labels(&slow).len() == 2).await);
	assert_eq!(handler.labels(&slow), vec!["stall", "after stall"]);
}

#[tokio::test]
async fn failures_and_panics_do_not_stop_the_worker() {
	let (queues, handler) = queues();
	let u = user("1");

	for label in ["one", "fail", "two", "panic", "three"] {
		queues.add_response_to_queue(&u, text(label));
	}

	assert!(eventually(Duration::from_secs(1), || handler.labels(&u).len() == 5).await);
	assert_eq!(handler.labels(&u), vec!["one", "fail", "two", "panic", "three"]);
	assert!(queues.has_worker(&u));
}

#[tokio::test]
async fn stop_process_tears_down_and_next_add_starts_fresh() {
	let (queues, handler) = queues();
	let u = user("1");

	queues.add_response_to_queue(&u, text("before"));
	queues.add_response_to_queue(&u, Instruction::StopProcess);

	assert!(eventually(Duration::from_secs(1), || !queues.has_worker(&u)).await);
	assert_eq!(handler.labels(&u), vec!["before", "stop_process"]);

	queues.add_response_to_queue(&u, text("after"));
	assert!(queues.has_worker(&u));
	assert!(eventually(Duration::from_secs(1), || handler.labels(&u).len() == 3).await);
	assert_eq!(handler.labels(&u)[2], "after");
}

#[tokio::test]
async fn backlog_behind_stop_process_keeps_its_order() {
	let (queues, handler) = queues();
	let u = user("1");
	handler.delay("slow", Duration::from_millis(50));

	queues.add_response_to_queue(&u, text("slow"));
	queues.add_response_to_queue(&u, Instruction::StopProcess);
	queues.add_response_to_queue(&u, text("x"));
	queues.add_response_to_queue(&u, text("y"));

	// Added while the old worker is still busy; must still come after the backlog.
	tokio::time::sleep(Duration::from_millis(10)).await;
	queues.add_response_to_queue(&u, text("z"));

	assert!(eventually(Duration::from_secs(1), || handler.labels(&u).len() == 5).await);
	assert_eq!(handler.labels(&u), vec!["slow", "stop_process", "x", "y", "z"]);
	assert!(queues.has_worker(&u));
}

#[tokio::test]
async fn other_users_are_unaffected_by_stop_process() {
	let (queues, handler) = queues();
	let a = user("a");
	let b = user("b");

	queues.add_response_to_queue(&a, text("a1"));
	queues.add_response_to_queue(&b, text("b1"));
	queues.add_response_to_queue(&a, Instruction::StopProcess);

	assert!(eventually(Duration::from_secs(1), || !queues.has_worker(&a)).await);
	assert!(queues.has_worker(&b));

	queues.add_response_to_queue(&b, text("b2"));
	assert!(eventually(Duration::from_secs(1), || handler.labels(&b).len() == 2).await);
}

#[tokio::test]
async fn shutdown_drains_pending_work() {
	let (queues, handler) = queues();
	let u = user("1");
	handler.delay("m0", Duration::from_millis(20));
	for label in labels(5) {
		queues.add_response_to_queue(&u, text(&label));
	}

	queues.shutdown(Duration::from_secs(1)).await;

	assert_eq!(handler.labels(&u), labels(5));
	assert!(queues.is_empty());
}

#[tokio::test]
async fn shutdown_aborts_workers_past_the_grace() {
	let (queues, handler) = queues();
	let u = user("1");
	handler.delay("forever", Duration::from_secs(30));
	queues.add_response_to_queue(&u, text("forever"));
	queues.add_response_to_queue(&u, text("never"));

	let started = tokio::time::Instant::now();
	queues.shutdown(Duration::from_millis(50)).await;

	assert!(started.elapsed() < Duration::from_secs(1));
	assert!(handler.labels(&u).is_empty());
}
