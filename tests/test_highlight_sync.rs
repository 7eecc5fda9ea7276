mod session_test_utils;

use std::time::Duration;

use nudel::highlight::{Frame, MAX_WINDOW};
use nudel::pattern::{ControlPattern, Hap, Pattern, TimeSpan};
use serde_json::json;
use session_test_utils::{doc, fixture, Highlight};

/// `{ s: name }` over `[begin, end)` once, never repeating.
fn one_shot(begin: f64, end: f64, name: &str) -> ControlPattern {
    let whole = TimeSpan::from_floats(begin, end);
    let value = json!({ "s": name });
    Pattern::new(move |state| {
        whole
            .intersection(&state.span)
            .map(|part| Hap::new(Some(whole), part, value.clone()))
            .into_iter()
            .collect()
    })
}

fn sounds_at(highlights: &[Highlight], phase: f64) -> Vec<Vec<String>> {
    highlights
        .iter()
        .filter(|h| h.phase == phase)
        .map(|h| h.sounds.clone())
        .collect()
}

#[tokio::test]
async fn test_highlights_follow_event_interval() {
    let mut fx = fixture();
    fx.session
        .set_document_pattern(doc(1), one_shot(1.0, 1.5, "bd"))
        .await
        .unwrap();

    let mut highlight = fx.session.highlight_loop();
    highlight.start();

    fx.cyclist.seek(0.8);
    assert_eq!(highlight.tick(), Frame::Primed { phase: 0.8 });
    for phase in [0.9, 1.0, 1.2, 1.6] {
        fx.cyclist.seek(phase);
        highlight.tick();
    }

    let highlights = fx.recorder.highlights();
    assert_eq!(sounds_at(&highlights, 0.8), Vec::<Vec<String>>::new());
    assert_eq!(sounds_at(&highlights, 0.9), vec![Vec::<String>::new()]);
    assert_eq!(sounds_at(&highlights, 1.0), vec![vec!["bd".to_string()]]);
    assert_eq!(sounds_at(&highlights, 1.2), vec![vec!["bd".to_string()]]);
    assert_eq!(sounds_at(&highlights, 1.6), vec![Vec::<String>::new()]);
}

#[tokio::test]
async fn test_events_are_partitioned_by_document() {
    let mut fx = fixture();
    fx.session.evaluate(doc(1), "$: bd sn", false).await;
    fx.session.evaluate(doc(2), "$: hh hh hh hh", false).await;
    fx.session.evaluate(doc(3), "$: ~", false).await;

    let mut highlight = fx.session.highlight_loop();
    highlight.start();
    fx.cyclist.seek(0.5);
    highlight.tick();
    fx.cyclist.seek(0.55);
    highlight.tick();

    let highlights = fx.recorder.highlights();
    assert_eq!(highlights.len(), 3, "one call per known document");
    assert_eq!(highlights[0].doc, doc(1));
    assert_eq!(highlights[0].sounds, vec!["sn"]);
    assert_eq!(highlights[1].doc, doc(2));
    assert_eq!(highlights[1].sounds, vec!["hh"]);
    assert_eq!(highlights[2].doc, doc(3));
    assert!(highlights[2].sounds.is_empty());
}

#[tokio::test]
async fn test_event_starting_at_phase_is_highlighted() {
    let mut fx = fixture();
    fx.session.evaluate(doc(1), "$: bd sn", false).await;

    let mut highlight = fx.session.highlight_loop();
    highlight.start();
    fx.cyclist.seek(0.45);
    highlight.tick();
    fx.cyclist.seek(0.5);
    highlight.tick();

    // bd ends and sn begins exactly at 0.5; both intervals are closed
    let mut sounds = fx.recorder.highlights()[0].sounds.clone();
    sounds.sort();
    assert_eq!(sounds, vec!["bd", "sn"]);
}

#[tokio::test]
async fn test_stall_is_clamped_to_max_window() {
    let mut fx = fixture();
    fx.session.evaluate(doc(1), "$: bd", false).await;

    let mut highlight = fx.session.highlight_loop();
    highlight.start();
    fx.cyclist.seek(0.1);
    highlight.tick();
    fx.cyclist.seek(42.3);

    match highlight.tick() {
        Frame::Drawn { window, .. } => {
            assert!(
                window.width() <= MAX_WINDOW + 1e-9,
                "window {:?} wider than {}",
                window,
                MAX_WINDOW
            );
            assert_eq!(window.end, 42.3);
        }
        other => panic!("expected a drawn frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_new_evaluations_show_up_while_drawing() {
    let mut fx = fixture();
    let mut highlight = fx.session.highlight_loop();
    highlight.start();

    fx.cyclist.seek(0.1);
    highlight.tick();
    fx.cyclist.seek(0.2);
    assert_eq!(highlight.tick(), Frame::NoPattern { phase: 0.2 });

    fx.session.evaluate(doc(5), "$: cp", false).await;
    fx.cyclist.seek(0.3);
    assert!(matches!(highlight.tick(), Frame::Drawn { active: 1, .. }));

    fx.session.remove_document(doc(5)).await.unwrap();
    fx.cyclist.seek(0.4);
    assert!(matches!(highlight.tick(), Frame::Drawn { active: 0, .. }));
    let highlights = fx.recorder.highlights();
    assert_eq!(highlights.len(), 1, "removed documents are not drawn");
}

#[tokio::test]
async fn test_disabling_highlights_clears_renderer() {
    let mut fx = fixture();
    fx.session.evaluate(doc(1), "$: bd", false).await;

    let handle = fx.session.highlight_loop().spawn(100.0, true);
    for _ in 0..5 {
        fx.cyclist.advance(0.02);
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
    assert!(!fx.recorder.highlights().is_empty());

    handle.stop();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(*fx.recorder.cleared.lock().unwrap(), 1);

    let frames = fx.recorder.highlights().len();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(fx.recorder.highlights().len(), frames, "stopped loop draws nothing");

    handle.shutdown().await;
}
