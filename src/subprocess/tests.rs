#[cfg(test)]
mod tests {
    use super::super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct Counters {
        success: Arc<AtomicUsize>,
        failure: Arc<AtomicUsize>,
        exits: Arc<Mutex<Vec<ExitStatus>>>,
    }

    fn mock_command(config: CommandConfig) -> (SystemCommand, MockProcessSpawner) {
        let spawner = MockProcessSpawner::new();
        let cmd = SystemCommand::with_spawner("mock --run", config, Arc::new(spawner.clone()));
        (cmd, spawner)
    }

    fn count_outcomes(cmd: &SystemCommand) -> Counters {
        let counters = Counters {
            success: Arc::new(AtomicUsize::new(0)),
            failure: Arc::new(AtomicUsize::new(0)),
            exits: Arc::new(Mutex::new(Vec::new())),
        };

        let success = Arc::clone(&counters.success);
        cmd.on_success(move |_| {
            success.fetch_add(1, Ordering::SeqCst);
        });
        let failure = Arc::clone(&counters.failure);
        cmd.on_failure(move |_| {
            failure.fetch_add(1, Ordering::SeqCst);
        });
        let exits = Arc::clone(&counters.exits);
        cmd.on_exit(move |status| exits.lock().unwrap().push(*status));

        counters
    }

    #[tokio::test]
    async fn test_zero_exit_fires_success_once() {
        let (cmd, spawner) = mock_command(CommandConfig::default());
        let counters = count_outcomes(&cmd);

        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        cmd.stdout()
            .on_line(move |line| sink.lock().unwrap().push(line.to_string()));

        cmd.execute().unwrap();
        let mut process = spawner.take_process().unwrap();
        process.write_stdout(b"hello\nworld\n").await.unwrap();
        process.finish(0);

        assert_eq!(cmd.wait().await.unwrap(), ExitStatus::Success);
        assert_eq!(cmd.outcome(), ProcessOutcome::Succeeded);
        assert_eq!(counters.success.load(Ordering::SeqCst), 1);
        assert_eq!(counters.failure.load(Ordering::SeqCst), 0);
        assert_eq!(*counters.exits.lock().unwrap(), vec![ExitStatus::Success]);
        assert_eq!(*lines.lock().unwrap(), vec!["hello", "world"]);
        assert_eq!(cmd.output(StreamName::Stdout), "hello\nworld\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_fires_failure_once() {
        let (cmd, spawner) = mock_command(CommandConfig::default());
        let counters = count_outcomes(&cmd);

        cmd.execute().unwrap();
        let mut process = spawner.take_process().unwrap();
        process.write_stderr(b"boom\n").await.unwrap();
        process.finish(3);

        assert_eq!(cmd.wait().await.unwrap(), ExitStatus::Error(3));
        assert_eq!(cmd.outcome(), ProcessOutcome::Failed);
        assert_eq!(counters.success.load(Ordering::SeqCst), 0);
        assert_eq!(counters.failure.load(Ordering::SeqCst), 1);
        assert_eq!(*counters.exits.lock().unwrap(), vec![ExitStatus::Error(3)]);
        assert_eq!(cmd.output(StreamName::Stderr), "boom\n");
        assert_eq!(cmd.exit_status(), Some(ExitStatus::Error(3)));
    }

    #[tokio::test]
    async fn test_execute_while_streams_open_does_not_spawn() {
        let (cmd, spawner) = mock_command(CommandConfig::default());

        cmd.execute().unwrap();
        assert!(matches!(cmd.execute(), Err(CommandError::AlreadyRunning)));
        assert_eq!(spawner.spawn_count(), 1);

        spawner.take_process().unwrap().finish(0);
        cmd.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_reexecution_resets_outcome_and_keeps_observers() {
        let (cmd, spawner) = mock_command(CommandConfig::default());
        let counters = count_outcomes(&cmd);

        cmd.execute().unwrap();
        let first_pid = cmd.pid().unwrap();
        spawner.take_process().unwrap().finish(1);
        cmd.wait().await.unwrap();
        assert_eq!(cmd.outcome(), ProcessOutcome::Failed);

        cmd.execute().unwrap();
        assert_eq!(cmd.outcome(), ProcessOutcome::Pending);
        assert_ne!(cmd.pid(), Some(first_pid));
        let mut process = spawner.take_process().unwrap();
        process.write_stdout(b"again\n").await.unwrap();
        process.finish(0);
        cmd.wait().await.unwrap();

        assert_eq!(cmd.outcome(), ProcessOutcome::Succeeded);
        assert_eq!(counters.success.load(Ordering::SeqCst), 1);
        assert_eq!(counters.failure.load(Ordering::SeqCst), 1);
        assert_eq!(counters.exits.lock().unwrap().len(), 2);
        assert_eq!(cmd.output(StreamName::Stdout), "again\n");
        assert_eq!(spawner.spawn_count(), 2);
    }

    #[tokio::test]
    async fn test_completion_waits_for_open_streams() {
        let (cmd, spawner) = mock_command(CommandConfig::default());
        let counters = count_outcomes(&cmd);

        cmd.execute().unwrap();
        let mut process = spawner.take_process().unwrap();
        process.exit(0);

        assert_eq!(cmd.wait_exit().await.unwrap(), ExitStatus::Success);
        assert_eq!(cmd.outcome(), ProcessOutcome::Pending);
        assert!(cmd.is_running());

        process.write_stdout(b"late output\n").await.unwrap();
        process.close_stdout();
        process.close_stderr();
        cmd.wait().await.unwrap();

        assert_eq!(counters.success.load(Ordering::SeqCst), 1);
        assert_eq!(cmd.output(StreamName::Stdout), "late output\n");
        assert!(!cmd.is_running());
    }

    #[tokio::test]
    async fn test_reaper_failure_fails_without_exit_observers() {
        let (cmd, spawner) = mock_command(CommandConfig::default());
        let counters = count_outcomes(&cmd);

        cmd.execute().unwrap();
        let mut process = spawner.take_process().unwrap();
        process.close_stdout();
        process.close_stderr();
        process.fail_exit("reaped elsewhere");

        assert!(matches!(
            cmd.wait().await,
            Err(CommandError::ExitStatusUnavailable(_))
        ));
        assert_eq!(cmd.outcome(), ProcessOutcome::Failed);
        assert_eq!(counters.failure.load(Ordering::SeqCst), 1);
        assert!(counters.exits.lock().unwrap().is_empty());
        assert_eq!(cmd.exit_status(), None);
    }

    #[tokio::test]
    async fn test_missing_exit_status_times_out() {
        let config = CommandConfig::default().with_exit_status_timeout(Some(Duration::from_millis(50)));
        let (cmd, spawner) = mock_command(config);
        let counters = count_outcomes(&cmd);

        cmd.execute().unwrap();
        let mut process = spawner.take_process().unwrap();
        process.close_stdout();
        process.close_stderr();
        cmd.close_stdin().unwrap();

        assert!(matches!(
            cmd.wait().await,
            Err(CommandError::ExitStatusUnavailable(_))
        ));
        assert_eq!(counters.failure.load(Ordering::SeqCst), 1);

        // A status arriving after the deadline changes nothing
        process.exit(0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cmd.outcome(), ProcessOutcome::Failed);
        assert_eq!(counters.success.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stdin_round_trip() {
        let (cmd, spawner) = mock_command(CommandConfig::default());

        cmd.execute().unwrap();
        let mut process = spawner.take_process().unwrap();
        cmd.write_stdin(b"ping\n").await.unwrap();
        cmd.close_stdin().unwrap();

        assert_eq!(process.read_stdin().await.unwrap(), "ping\n");
        assert!(matches!(
            cmd.write_stdin(b"pong\n").await,
            Err(CommandError::StdinClosed)
        ));

        process.finish(0);
        cmd.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_kill_unknown_pid_reports_signal_failure() {
        let (cmd, spawner) = mock_command(CommandConfig::default());

        cmd.execute().unwrap();
        let result = cmd.kill(Signal::SIGTERM, false).await;
        assert!(matches!(
            result,
            Err(CommandError::SignalDelivery {
                signal: Signal::SIGTERM,
                ..
            })
        ));
        assert!(cmd.is_running());

        spawner.take_process().unwrap().finish(0);
        cmd.wait().await.unwrap();
    }

    /// Real child whose exit status is never delivered
    struct LostExitSpawner;

    impl ProcessSpawner for LostExitSpawner {
        fn spawn(&self, command: &CommandLine, config: &CommandConfig) -> Result<SpawnedProcess> {
            let mut process = TokioProcessSpawner.spawn(command, config)?;
            process.exit = Box::pin(async { Err(std::io::Error::other("reaped elsewhere")) });
            Ok(process)
        }
    }

    #[tokio::test]
    async fn test_kill_closes_streams_when_exit_status_is_lost() {
        // The background sleep keeps stdout and stderr open past the kill
        let cmd = SystemCommand::with_spawner(
            "sleep 30 & exec sleep 30",
            CommandConfig::default(),
            Arc::new(LostExitSpawner),
        );
        let counters = count_outcomes(&cmd);
        cmd.execute().unwrap();

        let result = cmd.kill(Signal::SIGKILL, true).await;
        assert!(matches!(
            result,
            Err(CommandError::ExitStatusUnavailable(_))
        ));

        for name in StreamName::ALL {
            assert_eq!(cmd.handle(name).unwrap().state(), StreamState::Closed);
        }
        assert_eq!(cmd.outcome(), ProcessOutcome::Failed);
        assert_eq!(counters.failure.load(Ordering::SeqCst), 1);
        assert!(counters.exits.lock().unwrap().is_empty());
        assert!(matches!(
            cmd.wait().await,
            Err(CommandError::ExitStatusUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_operations_before_execute() {
        let (cmd, _spawner) = mock_command(CommandConfig::default());

        assert!(matches!(cmd.kill(None, false).await, Err(CommandError::NotStarted)));
        assert!(matches!(cmd.wait().await, Err(CommandError::NotStarted)));
        assert!(matches!(cmd.close_stdin(), Err(CommandError::NotStarted)));
        assert_eq!(cmd.pid(), None);
        assert_eq!(cmd.outcome(), ProcessOutcome::Pending);
        assert_eq!(cmd.output(StreamName::Stdout), "");
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_command_reusable() {
        let (cmd, spawner) = mock_command(CommandConfig::default());
        spawner.fail_next_spawn(std::io::ErrorKind::NotFound);

        assert!(matches!(cmd.execute(), Err(CommandError::CommandNotFound(_))));
        assert_eq!(cmd.pid(), None);

        cmd.execute().unwrap();
        spawner.take_process().unwrap().finish(0);
        cmd.wait().await.unwrap();

        let history = spawner.get_call_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], CommandLine::Shell("mock --run".to_string()));
    }

    #[tokio::test]
    async fn test_observer_registered_from_completion_callback() {
        let (cmd, spawner) = mock_command(CommandConfig::default());
        let nested = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&nested);
        cmd.on_success(move |cmd| {
            let counter = Arc::clone(&counter);
            cmd.on_exit(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        cmd.execute().unwrap();
        spawner.take_process().unwrap().finish(0);
        cmd.wait().await.unwrap();

        // Exit observers are snapshotted after success observers ran
        assert_eq!(nested.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handle_exposes_current_execution() {
        let (cmd, spawner) = mock_command(CommandConfig::default());
        assert!(cmd.handle(StreamName::Stdout).is_none());

        cmd.execute().unwrap();
        let stdout = cmd.handle(StreamName::Stdout).unwrap();
        assert_eq!(stdout.state(), StreamState::Open);

        spawner.take_process().unwrap().finish(0);
        cmd.wait().await.unwrap();
        assert_eq!(stdout.state(), StreamState::Closed);
        assert_eq!(cmd.completion_state(), Some(CompletionState::Completed));
    }
}
