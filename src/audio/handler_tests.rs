//! Integration tests for the engine handler.
//!
//! These cover output selection, the reduction of engine events into
//! controller transitions, and the engine thread lifecycle.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use {
        async_channel::Receiver,
        tempfile::{TempDir, tempdir},
        tokio::time::{Duration, sleep, timeout},
    };

    use crate::{
        audio::{
            engine::{EngineEvent, PlaybackState, StateCause, TrackStatus},
            handler::{EngineHandler, HandlerEvent},
            output::OutputDescriptor,
            test_support::{FakeDecoderFactory, FakeOutput, FakeOutputMonitor},
        },
        config::SettingsManager,
        player::{PlayState, PlayerController, PlayerEvent, Track},
    };

    // Default timeout in milliseconds for test async operations
    const TEST_TIMEOUT_MS: u64 = 2000;

    struct Fixture {
        handler: EngineHandler,
        controller: Arc<PlayerController>,
        settings: Arc<SettingsManager>,
        _dir: TempDir,
    }

    fn fixture_with_output(descriptor: &str) -> Fixture {
        let dir = tempdir().unwrap();
        let settings =
            Arc::new(SettingsManager::with_config_path(dir.path().join("settings.json")).unwrap());
        if !descriptor.is_empty() {
            settings.set_audio_output(descriptor).unwrap();
        }

        let controller = Arc::new(PlayerController::new());
        let handler = EngineHandler::new(
            controller.clone(),
            settings.clone(),
            Arc::new(FakeDecoderFactory::default()),
        )
        .unwrap();

        Fixture {
            handler,
            controller,
            settings,
            _dir: dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_output("")
    }

    fn drain(events: &Receiver<HandlerEvent>) -> Vec<HandlerEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    fn register(handler: &EngineHandler, names: &[&str]) -> FakeOutputMonitor {
        let monitor = FakeOutputMonitor::default();
        for name in names {
            handler.add_output(FakeOutput::builder(*name, &monitor));
        }
        monitor
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        timeout(Duration::from_millis(TEST_TIMEOUT_MS), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn wait_for_status(events: &Receiver<HandlerEvent>, status: TrackStatus) {
        timeout(Duration::from_millis(TEST_TIMEOUT_MS), async {
            while let Ok(event) = events.recv().await {
                if event == HandlerEvent::TrackStatusChanged(status) {
                    break;
                }
            }
        })
        .await
        .unwrap();
    }

    fn output_changed(name: &str) -> HandlerEvent {
        HandlerEvent::OutputChanged(name.to_string())
    }

    fn device_changed(device: &str) -> HandlerEvent {
        HandlerEvent::DeviceChanged(device.to_string())
    }

    #[test]
    fn test_same_descriptor_twice_emits_once() {
        let f = fixture();
        register(&f.handler, &["alpha", "beta"]);
        let events = f.handler.subscribe();

        f.handler.change_output("beta|hw:1");
        f.handler.change_output("beta|hw:1");

        assert_eq!(
            drain(&events),
            vec![output_changed("beta"), device_changed("hw:1")]
        );
        assert_eq!(
            f.handler.current_output(),
            OutputDescriptor::new("beta", "hw:1")
        );
    }

    #[test]
    fn test_empty_descriptor_without_backends() {
        let f = fixture();
        let events = f.handler.subscribe();

        f.handler.change_output("");

        assert!(drain(&events).is_empty());
        assert_eq!(f.handler.current_output(), OutputDescriptor::default());
    }

    #[test]
    fn test_empty_descriptor_selects_first_backend_once() {
        let f = fixture();
        register(&f.handler, &["pulse", "alsa"]);
        let events = f.handler.subscribe();

        f.handler.change_output("");
        f.handler.change_output("");

        assert_eq!(
            drain(&events),
            vec![output_changed("alsa"), device_changed("default")]
        );
    }

    #[test]
    fn test_unregistered_backend_is_ignored() {
        let f = fixture();
        register(&f.handler, &["alpha"]);
        let events = f.handler.subscribe();

        f.handler.change_output("missing|dev");

        assert!(drain(&events).is_empty());
        assert_eq!(f.handler.current_output(), OutputDescriptor::default());
    }

    #[test]
    fn test_malformed_descriptor_is_ignored() {
        let f = fixture();
        register(&f.handler, &["alpha"]);
        let events = f.handler.subscribe();

        f.handler.change_output("alpha");

        assert!(drain(&events).is_empty());
    }

    #[test]
    fn test_device_only_change() {
        let f = fixture();
        register(&f.handler, &["alpha", "beta"]);
        let events = f.handler.subscribe();

        f.handler.change_output("alpha|d1");
        f.handler.change_output("alpha|d2");

        assert_eq!(
            drain(&events),
            vec![
                output_changed("alpha"),
                device_changed("d1"),
                device_changed("d2"),
            ]
        );
    }

    #[test]
    fn test_backend_change_emits_both() {
        let f = fixture();
        register(&f.handler, &["alpha", "beta"]);
        let events = f.handler.subscribe();

        f.handler.change_output("alpha|d1");
        f.handler.change_output("beta|d2");

        assert_eq!(
            drain(&events),
            vec![
                output_changed("alpha"),
                device_changed("d1"),
                output_changed("beta"),
                device_changed("d2"),
            ]
        );
    }

    #[test]
    fn test_lists_outputs_and_devices() {
        let f = fixture();
        register(&f.handler, &["beta", "alpha"]);

        assert_eq!(f.handler.get_all_outputs(), vec!["alpha", "beta"]);
        assert_eq!(f.handler.get_output_devices("alpha").len(), 2);
        assert!(f.handler.get_output_devices("gamma").is_empty());
    }

    #[test]
    fn test_end_of_track_advances_once() {
        let f = fixture();
        f.controller.set_queue(vec![
            Track::new("/music/a.flac", 1000),
            Track::new("/music/b.flac", 1000),
            Track::new("/music/c.flac", 1000),
        ]);
        f.controller.play();
        let events = f.handler.subscribe();

        f.handler
            .handle_engine_event(EngineEvent::TrackStatusChanged(TrackStatus::EndOfTrack));
        assert_eq!(f.controller.current_index(), Some(1));

        f.handler
            .handle_engine_event(EngineEvent::TrackStatusChanged(TrackStatus::EndOfTrack));
        assert_eq!(f.controller.current_index(), Some(2));

        assert_eq!(
            drain(&events),
            vec![
                HandlerEvent::TrackStatusChanged(TrackStatus::EndOfTrack),
                HandlerEvent::TrackStatusChanged(TrackStatus::EndOfTrack),
            ]
        );
    }

    #[test]
    fn test_engine_states_drive_controller() {
        let f = fixture();
        f.controller.set_queue(vec![Track::new("/music/a.flac", 1000)]);
        f.controller.play();

        f.handler.handle_engine_event(EngineEvent::StateChanged(
            PlaybackState::Paused,
            StateCause::Engine,
        ));
        assert_eq!(f.controller.play_state(), PlayState::Paused);

        f.handler.handle_engine_event(EngineEvent::StateChanged(
            PlaybackState::Playing,
            StateCause::Engine,
        ));
        assert_eq!(f.controller.play_state(), PlayState::Paused);

        f.handler.handle_engine_event(EngineEvent::StateChanged(
            PlaybackState::Error,
            StateCause::Engine,
        ));
        assert_eq!(f.controller.play_state(), PlayState::Stopped);
    }

    #[test]
    fn test_engine_initiated_stop_stops_controller() {
        let f = fixture();
        f.controller.set_queue(vec![Track::new("/music/a.flac", 1000)]);
        f.controller.play();

        f.handler.handle_engine_event(EngineEvent::StateChanged(
            PlaybackState::Stopped,
            StateCause::Engine,
        ));

        assert_eq!(f.controller.play_state(), PlayState::Stopped);
    }

    #[test]
    fn test_requested_state_echoes_leave_controller_alone() {
        let f = fixture();
        f.controller.set_queue(vec![Track::new("/music/a.flac", 1000)]);
        f.controller.play();

        f.handler.handle_engine_event(EngineEvent::StateChanged(
            PlaybackState::Stopped,
            StateCause::Requested,
        ));
        f.handler.handle_engine_event(EngineEvent::StateChanged(
            PlaybackState::Paused,
            StateCause::Requested,
        ));

        assert_eq!(f.controller.play_state(), PlayState::Playing);
    }

    #[test]
    fn test_no_track_stops_controller() {
        let f = fixture();
        f.controller.set_queue(vec![Track::new("/music/a.flac", 1000)]);
        f.controller.play();
        let events = f.handler.subscribe();

        f.handler
            .handle_engine_event(EngineEvent::TrackStatusChanged(TrackStatus::NoTrack));

        assert_eq!(f.controller.play_state(), PlayState::Stopped);
        assert_eq!(
            drain(&events),
            vec![HandlerEvent::TrackStatusChanged(TrackStatus::NoTrack)]
        );
    }

    #[test]
    fn test_engine_position_reaches_controller() {
        let f = fixture();

        f.handler.handle_engine_event(EngineEvent::PositionChanged(1234));

        assert_eq!(f.controller.position(), 1234);
    }

    #[test]
    fn test_about_to_finish_is_forwarded() {
        let f = fixture();
        let events = f.handler.subscribe();

        f.handler.handle_engine_event(EngineEvent::TrackAboutToFinish);

        assert_eq!(drain(&events), vec![HandlerEvent::TrackAboutToFinish]);
    }

    #[test]
    fn test_setup_replays_configured_output() {
        let f = fixture_with_output("beta|hw:1");
        register(&f.handler, &["alpha", "beta"]);
        let events = f.handler.subscribe();

        f.handler.setup();

        assert_eq!(
            drain(&events),
            vec![output_changed("beta"), device_changed("hw:1")]
        );
    }

    #[tokio::test]
    async fn test_settings_change_switches_output() {
        let f = fixture_with_output("beta|hw:1");
        register(&f.handler, &["alpha", "beta"]);
        f.handler.setup();
        let events = f.handler.subscribe();
        let _event_loop = f.handler.start_event_loop();

        f.settings.set_audio_output("alpha|").unwrap();

        let received = timeout(Duration::from_millis(TEST_TIMEOUT_MS), async {
            let mut received = Vec::new();
            while received.len() < 2 {
                let Ok(event) = events.recv().await else {
                    break;
                };
                received.push(event);
            }
            received
        })
        .await
        .unwrap();

        assert_eq!(received, vec![output_changed("alpha"), device_changed("")]);
    }

    #[tokio::test]
    async fn test_stop_then_play_keeps_playing() {
        let f = fixture();
        let monitor = register(&f.handler, &["fake"]);
        let events = f.handler.subscribe();
        let _event_loop = f.handler.start_event_loop();
        f.handler.setup();

        f.controller.set_queue(vec![Track::new("/music/a.flac", 60_000)]);
        f.controller.play();
        wait_for_status(&events, TrackStatus::BufferedTrack).await;

        f.controller.stop();
        f.controller.play();

        wait_until(|| monitor.init_calls() == 2).await;
        sleep(Duration::from_millis(100)).await;

        assert_eq!(f.controller.play_state(), PlayState::Playing);
        assert_eq!(monitor.uninit_calls(), 1);
    }

    #[tokio::test]
    async fn test_unopenable_track_stops_controller() {
        let f = fixture();
        register(&f.handler, &["fake"]);
        let player_events = f.controller.subscribe();
        let _event_loop = f.handler.start_event_loop();
        f.handler.setup();

        f.controller.set_queue(vec![Track::new("/music/broken.flac", 1000)]);
        f.controller.play();

        timeout(Duration::from_millis(TEST_TIMEOUT_MS), async {
            while let Ok(event) = player_events.recv().await {
                if event == PlayerEvent::PlayStateChanged(PlayState::Stopped) {
                    break;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(f.controller.play_state(), PlayState::Stopped);
    }

    #[tokio::test]
    async fn test_track_change_and_seek_reach_engine() {
        let f = fixture();
        register(&f.handler, &["fake"]);
        let events = f.handler.subscribe();
        let player_events = f.controller.subscribe();
        let _event_loop = f.handler.start_event_loop();
        f.handler.setup();

        let track = Track::new("/music/a.flac", 60_000);
        f.handler.handle_player_event(PlayerEvent::CurrentTrackChanged(Some(track)));
        wait_for_status(&events, TrackStatus::LoadedTrack).await;

        f.handler.handle_player_event(PlayerEvent::PositionMoved(12_345));

        timeout(Duration::from_millis(TEST_TIMEOUT_MS), async {
            while let Ok(event) = player_events.recv().await {
                if event == PlayerEvent::PositionChanged(12_345) {
                    break;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(f.controller.position(), 12_345);
    }

    #[tokio::test]
    async fn test_event_loop_starts_once() {
        let f = fixture();

        let first = f.handler.start_event_loop();
        let second = f.handler.start_event_loop();

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_drop_joins_engine_and_releases_output_once() {
        let f = fixture();
        let monitor = register(&f.handler, &["fake"]);
        let events = f.handler.subscribe();
        let _event_loop = f.handler.start_event_loop();
        f.handler.setup();

        f.controller.set_queue(vec![Track::new("/music/a.flac", 60_000)]);
        f.controller.play();

        wait_for_status(&events, TrackStatus::BufferedTrack).await;

        assert_eq!(monitor.init_calls(), 1);
        assert_eq!(monitor.uninit_calls(), 0);

        let Fixture {
            handler,
            controller,
            ..
        } = f;
        drop(handler);

        assert_eq!(monitor.uninit_calls(), 1);
        assert_eq!(controller.play_state(), PlayState::Playing);
    }
}
