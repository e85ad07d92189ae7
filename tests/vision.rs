//! Vision analysis results turning into observations and timers

mod common;

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use common::harness;
use sous_live::vision::{FrameAnalysis, Rejection, SuggestionDecision, SuggestionFilter, TimerSuggestion};
use sous_live::{Config, Error, SessionCommand, SessionEvent, TimerEngine};

fn suggesting(label: &str, seconds: f64) -> FrameAnalysis {
    FrameAnalysis {
        description: format!("Water boiling, {label} going in"),
        timer_suggestion: Some(TimerSuggestion {
            label: label.to_string(),
            duration_seconds: seconds,
            reason: Some("pasta just added".to_string()),
        }),
        degraded: false,
    }
}

#[tokio::test]
async fn test_repeated_suggestion_creates_one_timer() {
    let mut h = harness(Config::default());
    let start = Instant::now();

    h.session.apply_analysis(suggesting("Pasta", 600.0), start);
    h.session
        .apply_analysis(suggesting("Pasta", 600.0), start + Duration::from_secs(5));

    let timers = h.session.timers().list();
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].label, "Pasta");
    assert_eq!(timers[0].duration_seconds, 600);
    assert_eq!(h.session.observations().len(), 2);
}

#[tokio::test]
async fn test_overlapping_label_is_not_duplicated() {
    let mut h = harness(Config::default());
    h.session
        .handle_command(SessionCommand::CreateTimer {
            label: "Pasta water".to_string(),
            duration: NonZeroU32::new(300).unwrap(),
        });

    h.session
        .apply_analysis(suggesting("pasta", 480.0), Instant::now());

    assert_eq!(h.session.timers().list().len(), 1);
}

#[tokio::test]
async fn test_deleted_label_stays_suppressed_within_window() {
    let mut h = harness(Config::default());
    let start = Instant::now();

    h.session.apply_analysis(suggesting("Rice", 900.0), start);
    h.session
        .handle_command(SessionCommand::DeleteTimer("1".to_string()));
    assert!(h.session.timers().list().is_empty());

    h.session
        .apply_analysis(suggesting("rice", 900.0), start + Duration::from_secs(10));
    assert!(h.session.timers().list().is_empty());

    h.session
        .apply_analysis(suggesting("Rice", 900.0), start + Duration::from_secs(31));
    assert_eq!(h.session.timers().list().len(), 1);
}

#[tokio::test]
async fn test_proactive_timers_can_be_disabled() {
    let mut config = Config::default();
    config.behaviors.proactive_timers = false;
    let mut h = harness(config);

    h.session
        .apply_analysis(suggesting("Pasta", 600.0), Instant::now());

    assert!(h.session.timers().list().is_empty());
    assert_eq!(h.session.observations().len(), 1);
}

#[tokio::test]
async fn test_analysis_failure_is_logged_not_fatal() {
    let mut h = harness(Config::default());
    h.session.handle_command(SessionCommand::CameraOn);

    h.session
        .handle_analysis(Err(Error::RateLimit("slow down".to_string())));

    assert!(h.session.observations().is_empty());
    assert!(
        h.session
            .log()
            .iter()
            .any(|e| e.message.contains("slow down"))
    );
}

#[tokio::test]
async fn test_result_after_camera_off_is_dropped() {
    let mut h = harness(Config::default());
    h.session.handle_command(SessionCommand::CameraOn);
    h.session.handle_command(SessionCommand::CameraOff);

    h.session.handle_analysis(Ok(suggesting("Pasta", 600.0)));
    h.session
        .handle_analysis(Err(Error::RateLimit("slow down".to_string())));

    assert!(h.session.observations().is_empty());
    assert!(h.session.timers().list().is_empty());
    assert!(
        !h.session
            .log()
            .iter()
            .any(|e| e.message.contains("slow down"))
    );
}

#[tokio::test]
async fn test_result_with_camera_on_is_applied() {
    let mut h = harness(Config::default());
    h.session.handle_command(SessionCommand::CameraOn);

    h.session.handle_analysis(Ok(suggesting("Pasta", 600.0)));

    assert_eq!(h.session.observations().len(), 1);
    assert_eq!(h.session.timers().list().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_camera_analysis_runs_without_a_session() {
    let h = harness(Config::default());
    *h.analyzer.suggestion.lock().unwrap() = Some(TimerSuggestion {
        label: "Eggs".to_string(),
        duration_seconds: 420.0,
        reason: None,
    });
    let handle = h.session.handle();
    let mut rx = handle.subscribe();

    let driver = async {
        handle.send(SessionCommand::CameraOn).await.unwrap();
        loop {
            if let SessionEvent::TimerCreated(timer) = rx.recv().await.unwrap() {
                handle.send(SessionCommand::Quit).await.unwrap();
                return timer;
            }
        }
    };

    let (result, timer) = tokio::join!(h.session.run(), driver);
    result.unwrap();
    assert_eq!(timer.label, "Eggs");
    assert_eq!(timer.duration_seconds, 420);
    assert!(h.analyzer.calls.load(std::sync::atomic::Ordering::SeqCst) >= 1);
}

#[test]
fn test_filter_rejections() {
    let mut filter = SuggestionFilter::new(Duration::from_secs(30));
    let engine = TimerEngine::new();
    let now = Instant::now();

    let blank = TimerSuggestion {
        label: "  ".to_string(),
        duration_seconds: 60.0,
        reason: None,
    };
    assert_eq!(
        filter.evaluate(&blank, &engine, now),
        SuggestionDecision::Rejected(Rejection::EmptyLabel)
    );

    for bad in [0.0, -3.0, f64::NAN] {
        let suggestion = TimerSuggestion {
            label: "Steak".to_string(),
            duration_seconds: bad,
            reason: None,
        };
        assert_eq!(
            filter.evaluate(&suggestion, &engine, now),
            SuggestionDecision::Rejected(Rejection::InvalidDuration)
        );
    }

    let fractional = TimerSuggestion {
        label: "Steak".to_string(),
        duration_seconds: 89.6,
        reason: None,
    };
    assert_eq!(
        filter.evaluate(&fractional, &engine, now),
        SuggestionDecision::Create {
            label: "Steak".to_string(),
            duration: NonZeroU32::new(90).unwrap(),
        }
    );
}
