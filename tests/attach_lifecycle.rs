//! Attach lifecycle: uniqueness, negative precedence, self-healing and the
//! tail invariant, driven through a started engine.
//!
//! Run with: `cargo test --test attach_lifecycle`

mod common;

use common::{advance, assistant_turn, settle, unmarked_turn, user_turn, Harness};
use savechat::dom::El;
use savechat::engine::attach::{affordance_el, control_at_tail};
use savechat::engine::markers::{is_content_region, is_managed_tray};
use savechat::engine::HealOutcome;
use savechat::{EngineEvent, TerminationReason};

// ============================================================================
// Uniqueness and idempotence
// ============================================================================

#[tokio::test(start_paused = true)]
async fn initial_scan_attaches_once_per_assistant_turn() {
    let h = Harness::new();
    let question = h.page.add(user_turn("How do lifetimes work?"));
    let first = h.page.add(assistant_turn("Lifetimes name the scope a borrow is valid for."));
    let second = h.page.add(assistant_turn("Elision fills them in for common signatures."));
    let unmarked = h.page.add(unmarked_turn("A message rendered without role markers."));

    let report = h.engine.start().await.unwrap();

    assert_eq!(report.candidates, 3);
    assert_eq!(report.attached, 3);
    assert!(h.controls(question).is_empty());
    assert_eq!(h.controls(first).len(), 1);
    assert_eq!(h.controls(second).len(), 1);
    assert_eq!(h.controls(unmarked).len(), 1);
    assert_eq!(h.engine.registry().len(), 3);
    h.engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn repeated_scans_never_add_a_second_control() {
    let h = Harness::new();
    let host = h.page.add(assistant_turn("An answer that is long enough to save."));
    h.engine.start().await.unwrap();

    for _ in 0..3 {
        let report = h.engine.scan().await;
        assert_eq!(report.attached, 0);
    }
    // Mutations that touch the host re-run discovery for it
    h.doc().set_attribute(host, "class", "group w-full").unwrap();
    advance(50).await;

    assert_eq!(h.controls(host).len(), 1);
    assert_eq!(h.engine.registry().len(), 1);
    h.engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn turn_added_after_start_is_attached() {
    let h = Harness::new();
    h.engine.start().await.unwrap();
    assert!(h.engine.registry().is_empty());

    let host = h.page.add(assistant_turn("A freshly streamed answer arrives."));
    advance(50).await;

    assert_eq!(h.controls(host).len(), 1);
    assert!(h.engine.registry().contains(host));
    h.engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn streaming_turn_is_attached_once_text_arrives() {
    let h = Harness::new();
    h.engine.start().await.unwrap();

    let host = h.page.add(
        El::new("div")
            .author("assistant")
            .child(El::new("div").class("markdown prose")),
    );
    let region = h
        .doc()
        .read(|tree| tree.element(host).unwrap().find(is_content_region).unwrap().id());
    advance(300).await;
    assert!(h.controls(host).is_empty());

    h.doc().append(region, El::new("p").text("Streaming finished with a full answer.")).unwrap();
    // Readiness, then the bounded tray wait before a tray is synthesized
    advance(4_000).await;

    assert_eq!(h.controls(host).len(), 1);
    h.engine.shutdown();
}

// ============================================================================
// Negative precedence
// ============================================================================

#[tokio::test(start_paused = true)]
async fn user_and_editable_regions_never_get_controls() {
    let h = Harness::new();
    let question = h.page.add(
        El::new("div")
            .author("user")
            .child(El::new("div").class("markdown prose").text("Formatted like an answer, but mine.")),
    );
    let draft = h.page.add(
        El::new("div").author("assistant").child(
            El::new("div")
                .class("markdown prose")
                .attr("contenteditable", "true")
                .text("An assistant message opened for editing."),
        ),
    );
    let composer = h.page.add(
        El::new("form").child(
            El::new("div")
                .class("prose")
                .attr("contenteditable", "true")
                .text("Type a message to send here"),
        ),
    );

    let report = h.engine.start().await.unwrap();
    advance(5_000).await;

    assert_eq!(report.attached, 0);
    assert!(h.controls(question).is_empty());
    assert!(h.controls(draft).is_empty());
    assert!(h.controls(composer).is_empty());
    h.engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn control_is_removed_when_host_becomes_a_user_turn() {
    let mut h = Harness::new();
    let host = h.page.add(assistant_turn("An answer the page later re-labels."));
    h.engine.start().await.unwrap();
    assert_eq!(h.controls(host).len(), 1);
    h.drain();

    h.doc().set_attribute(host, "data-message-author-role", "user").unwrap();
    settle().await;

    assert!(h.controls(host).is_empty());
    assert!(h.drain().iter().any(|e| matches!(
        e,
        EngineEvent::SessionHealed { outcome: HealOutcome::Detached, .. }
    )));
    h.engine.shutdown();
}

// ============================================================================
// Self-healing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn removed_control_is_restored() {
    let mut h = Harness::new();
    let host = h.page.add(assistant_turn("Keep this answer saved somewhere."));
    h.engine.start().await.unwrap();
    let button = h.controls(host)[0];
    h.drain();

    h.doc().remove(button).unwrap();
    settle().await;

    let restored = h.controls(host);
    assert_eq!(restored.len(), 1);
    assert_ne!(restored[0], button);
    assert!(h.drain().iter().any(|e| matches!(
        e,
        EngineEvent::SessionHealed { outcome: HealOutcome::Reattached, .. }
    )));
    h.engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn replaced_tray_gets_a_new_control() {
    let h = Harness::new();
    let host = h.page.add(assistant_turn("The page re-renders this toolbar."));
    h.engine.start().await.unwrap();

    let tray = h.doc().read(|tree| {
        tree.element(host)
            .unwrap()
            .find(|e| e.attr_is("data-testid", "message-actions"))
            .unwrap()
            .id()
    });
    h.doc().remove(tray).unwrap();
    let fresh = h
        .doc()
        .append(
            host,
            El::new("div")
                .testid("message-actions")
                .child(El::new("button").attr("aria-label", "Copy")),
        )
        .unwrap();
    settle().await;

    let controls = h.controls(host);
    assert_eq!(controls.len(), 1);
    assert_eq!(h.doc().parent(controls[0]), Some(fresh));
    h.engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn duplicate_controls_are_collapsed_to_one() {
    let h = Harness::new();
    let host = h.page.add(assistant_turn("An answer that got cloned controls."));
    h.engine.start().await.unwrap();
    let original = h.controls(host)[0];

    // A framework re-render cloning the control next to the original
    let tray = h.doc().parent(original).unwrap();
    h.doc().append(tray, affordance_el()).unwrap();
    h.doc().append(tray, affordance_el()).unwrap();
    settle().await;

    assert_eq!(h.controls(host), vec![original]);
    h.engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn content_appended_after_tray_restores_tail_position() {
    let h = Harness::new();
    let host = h.page.add(assistant_turn("An answer with late footnotes."));
    h.engine.start().await.unwrap();

    h.doc()
        .append(host, El::new("div").class("footnotes").text("Sources: the book"))
        .unwrap();
    settle().await;

    let controls = h.controls(host);
    assert_eq!(controls.len(), 1);
    let button = controls[0];
    h.doc().read(|tree| {
        assert!(control_at_tail(tree, host, button));
        let tray = tree.element(tree.parent(button).unwrap()).unwrap();
        assert!(is_managed_tray(&tray));
        assert!(tray.is_last_element_child());
    });
    h.engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn removed_host_ends_its_session() {
    let mut h = Harness::new();
    let host = h.page.add(assistant_turn("An answer the page will discard."));
    h.engine.start().await.unwrap();
    h.drain();

    h.doc().remove(host).unwrap();
    settle().await;

    assert!(!h.engine.registry().contains(host));
    let terminated: Vec<_> = h
        .drain()
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                EngineEvent::SessionTerminated {
                    reason: TerminationReason::Disconnected,
                    ..
                }
            )
        })
        .collect();
    assert_eq!(terminated.len(), 1);
    h.engine.shutdown();
}
