//! # Shutdown
//!
//! `stop()` drains in-flight executions: their state calls are still served,
//! new execution requests are refused, and the drain deadline bounds how long
//! any execution can hold the processor up.

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::{Duration, Instant};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use qc_18_transaction_processor::{ConnectionState, ContextError, ProcessorConfig, Termination};
    use shared_types::ProcessStatus;

    use crate::handlers::{ScriptHandler, Step};
    use crate::validator::{
        fast_config, TestValidator, Transport, ValidatorBehavior, REPLY_TIMEOUT,
    };

    #[tokio::test]
    async fn test_stop_drains_in_flight_executions() {
        const EXECUTIONS: usize = 5;

        let behavior = ValidatorBehavior {
            state_delay: Duration::from_millis(500),
            ..ValidatorBehavior::default()
        };
        let mut validator = TestValidator::with_behavior(Transport::Memory, behavior).await;
        let processor = validator.processor(fast_config());
        processor.add_handler(ScriptHandler::new()).unwrap();
        processor.start().await.unwrap();
        let mut conn = validator.next_connection().await;

        let mut sent = HashSet::new();
        for i in 0..EXECUTIONS {
            sent.insert(conn.execute(&ScriptHandler::request(
                &format!("ctx-{i}"),
                &[Step::Get(ScriptHandler::address("a"))],
            )));
        }
        conn.wait_state_requests(EXECUTIONS).await;
        assert_eq!(processor.in_flight(), EXECUTIONS);

        let mut states = processor.subscribe_state();
        let stopping = tokio::spawn({
            let processor = processor.clone();
            async move { processor.stop().await }
        });
        timeout(
            REPLY_TIMEOUT,
            states.wait_for(|s| *s == ConnectionState::Draining),
        )
        .await
        .unwrap()
        .unwrap();

        // Refused while draining.
        let late = conn.execute(&ScriptHandler::request("ctx-late", &[]));

        timeout(REPLY_TIMEOUT, stopping).await.unwrap().unwrap();
        assert_eq!(processor.state(), ConnectionState::Stopped);
        assert_eq!(processor.in_flight(), 0);
        assert_eq!(conn.unregisters(), 1);

        let mut completed = HashSet::new();
        for _ in 0..=EXECUTIONS {
            let (id, response) = conn.next_response().await;
            if id == late {
                assert_eq!(response.status, ProcessStatus::InternalError);
                assert!(response.message.contains("shutting down"), "{}", response.message);
            } else {
                assert_eq!(response.status, ProcessStatus::Ok, "{}", response.message);
                completed.insert(id);
            }
        }
        assert_eq!(completed, sent);
    }

    #[tokio::test]
    async fn test_drain_deadline_cancels_pending_state_calls() {
        let (tx, mut errors) = mpsc::unbounded_channel();
        let behavior = ValidatorBehavior {
            answer_state: false,
            ..ValidatorBehavior::default()
        };
        let mut validator = TestValidator::with_behavior(Transport::Memory, behavior).await;
        let processor = validator.processor(ProcessorConfig {
            state_timeout_ms: 30_000,
            drain_timeout_ms: 100,
            drain_grace_ms: 500,
            ..fast_config()
        });
        processor
            .add_handler(ScriptHandler::new().reporting(tx))
            .unwrap();
        processor.start().await.unwrap();
        let conn = validator.next_connection().await;

        for i in 0..2 {
            conn.execute(&ScriptHandler::request(
                &format!("ctx-{i}"),
                &[Step::Get(ScriptHandler::address("a"))],
            ));
        }
        conn.wait_state_requests(2).await;

        let started = Instant::now();
        timeout(REPLY_TIMEOUT, processor.stop())
            .await
            .expect("stop is bounded by the drain deadline");
        assert!(started.elapsed() < Duration::from_secs(2));

        for _ in 0..2 {
            let error = timeout(REPLY_TIMEOUT, errors.recv()).await.unwrap().unwrap();
            assert_eq!(error, ContextError::ShuttingDown);
        }
        assert_eq!(processor.in_flight(), 0);
        assert_eq!(processor.wait_terminated().await, Termination::Requested);
    }

    #[tokio::test]
    async fn test_unresponsive_handler_aborted_after_grace() {
        let mut validator = TestValidator::bind(Transport::Memory).await;
        let processor = validator.processor(ProcessorConfig {
            drain_timeout_ms: 100,
            drain_grace_ms: 100,
            ..fast_config()
        });
        processor.add_handler(ScriptHandler::new()).unwrap();
        processor.start().await.unwrap();
        let mut conn = validator.next_connection().await;

        conn.execute(&ScriptHandler::request("ctx-stuck", &[Step::Sleep(60_000)]));
        // The ping is answered by the dispatch loop, after the request was taken.
        let ping = conn.ping();
        assert_eq!(conn.next_reply().await.correlation_id, ping);
        assert_eq!(processor.in_flight(), 1);

        let started = Instant::now();
        timeout(REPLY_TIMEOUT, processor.stop())
            .await
            .expect("stop is bounded by the drain deadline");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(processor.in_flight(), 0);
        assert_eq!(processor.state(), ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_concurrent_stops() {
        let mut validator = TestValidator::bind(Transport::Tcp).await;
        let processor = validator.processor(fast_config());
        processor.add_handler(ScriptHandler::new()).unwrap();
        processor.start().await.unwrap();
        let conn = validator.next_connection().await;

        let other = processor.clone();
        tokio::join!(processor.stop(), other.stop());
        processor.stop().await;

        assert_eq!(processor.state(), ConnectionState::Stopped);
        assert_eq!(conn.unregisters(), 1);
        assert_eq!(processor.wait_terminated().await, Termination::Requested);
    }
}
