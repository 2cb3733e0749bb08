//! Tree operation and observer delivery tests

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn conversation(doc: &Document) -> (NodeId, NodeId) {
    let main = doc.append(doc.body(), El::new("main")).unwrap();
    let turn = doc
        .append(
            main,
            El::new("div")
                .author("assistant")
                .child(El::new("div").class("markdown prose").text("Hello, world!"))
                .child(
                    El::new("div")
                        .class("flex items-center gap-1")
                        .child(El::new("button").attr("aria-label", "Copy")),
                ),
        )
        .unwrap();
    (main, turn)
}

#[test]
fn build_and_read_back() {
    let doc = Document::new("https://chatgpt.com/c/abc");
    let (_, turn) = conversation(&doc);

    doc.read(|tree| {
        let el = tree.element(turn).unwrap();
        assert_eq!(el.tag(), "div");
        assert!(el.attr_is(AUTHOR_ROLE_ATTR, "assistant"));
        assert_eq!(el.child_element_count(), 2);
        assert_eq!(el.descendants().count(), 3);
        assert_eq!(el.text_content(), "Hello, world!");
        assert!(el.is_connected());
        let tray = el.last_element_child().unwrap();
        assert!(tray.has_class("items-center"));
        assert!(tray.has_class_prefix("gap"));
        assert!(tray.is_last_element_child());
    });
}

#[test]
fn closest_is_inclusive() {
    let doc = Document::new("about:blank");
    let (main, turn) = conversation(&doc);

    doc.read(|tree| {
        let markdown = tree.element(turn).unwrap().find(|e| e.has_class("markdown")).unwrap();
        let found = markdown.closest(|e| e.has_attr(AUTHOR_ROLE_ATTR)).unwrap();
        assert_eq!(found.id(), turn);
        assert_eq!(markdown.closest(|e| e.has_class("markdown")).unwrap().id(), markdown.id());
        assert_eq!(markdown.ancestors().nth(1).unwrap().id(), main);
    });
}

#[test]
fn append_child_moves_existing_node() {
    let doc = Document::new("about:blank");
    let (_, turn) = conversation(&doc);
    let first = doc.read(|tree| tree.children(turn)[0]);

    doc.append_child(turn, first).unwrap();

    let children = doc.read(|tree| tree.children(turn).to_vec());
    assert_eq!(children.len(), 2);
    assert_eq!(children[1], first);
}

#[test]
fn insert_before_places_node() {
    let doc = Document::new("about:blank");
    let (_, turn) = conversation(&doc);
    let first = doc.read(|tree| tree.children(turn)[0]);
    let note = doc.build(El::new("span").text("note"));

    doc.insert_before(turn, note, Some(first)).unwrap();

    assert_eq!(doc.read(|tree| tree.children(turn)[0]), note);
}

#[test]
fn insert_before_rejects_foreign_reference() {
    let doc = Document::new("about:blank");
    let (main, turn) = conversation(&doc);
    let note = doc.build(El::new("span"));

    let err = doc.insert_before(turn, note, Some(main)).unwrap_err();
    assert!(matches!(err, DomError::NotAChild { .. }));
}

#[test]
fn cycles_are_rejected() {
    let doc = Document::new("about:blank");
    let (main, turn) = conversation(&doc);

    let err = doc.append_child(turn, main).unwrap_err();
    assert_eq!(err, DomError::HierarchyRequest { parent: turn, child: main });
}

#[test]
fn removed_subtree_is_disconnected() {
    let doc = Document::new("about:blank");
    let (_, turn) = conversation(&doc);
    let markdown = doc.read(|tree| tree.children(turn)[0]);

    doc.remove(turn).unwrap();

    assert!(!doc.is_connected(turn));
    assert!(!doc.is_connected(markdown));
    // Removing again is a no-op
    doc.remove(turn).unwrap();
}

#[test]
fn missing_nodes_error() {
    let doc = Document::new("about:blank");
    let ghost = NodeId::new();
    assert_eq!(doc.remove(ghost), Err(DomError::NodeNotFound(ghost)));
    assert_eq!(
        doc.set_attribute(ghost, "class", "x"),
        Err(DomError::NodeNotFound(ghost))
    );
}

#[test]
fn set_text_on_element_replaces_children() {
    let doc = Document::new("about:blank");
    let (_, turn) = conversation(&doc);

    doc.set_text(turn, "replaced").unwrap();

    assert_eq!(doc.text_content(turn), "replaced");
    assert_eq!(doc.read(|tree| tree.element(turn).unwrap().child_element_count()), 0);
}

#[test]
fn text_excluding_skips_subtrees() {
    let doc = Document::new("about:blank");
    let turn = doc
        .append(
            doc.body(),
            El::new("div")
                .child(El::new("p").text("keep "))
                .child(El::new("button").text("Copy"))
                .child(El::new("p").text("this")),
        )
        .unwrap();

    let text = doc.read(|tree| {
        tree.element(turn)
            .unwrap()
            .text_excluding(|el| el.tag() == "button")
    });
    assert_eq!(text, "keep this");
}

#[tokio::test]
async fn subtree_observer_sees_descendant_changes() {
    let doc = Document::new("about:blank");
    let (main, turn) = conversation(&doc);
    let mut observer = doc.observe(main, ObserveOptions::subtree());

    let extra = doc.append(turn, El::new("div")).unwrap();
    doc.remove(extra).unwrap();

    let batch = observer.next_batch().await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(
        batch[0],
        MutationRecord::ChildList { target: turn, added: vec![extra], removed: vec![] }
    );
    assert_eq!(
        batch[1],
        MutationRecord::ChildList { target: turn, added: vec![], removed: vec![extra] }
    );
}

#[tokio::test]
async fn non_subtree_observer_ignores_descendants() {
    let doc = Document::new("about:blank");
    let (main, turn) = conversation(&doc);
    let mut observer = doc.observe(
        main,
        ObserveOptions {
            child_list: true,
            ..Default::default()
        },
    );

    doc.append(turn, El::new("div")).unwrap();
    assert!(observer.take_records().is_empty());

    doc.append(main, El::new("div")).unwrap();
    assert_eq!(observer.take_records().len(), 1);
}

#[tokio::test]
async fn removal_of_observed_node_is_invisible_to_its_own_observer() {
    let doc = Document::new("about:blank");
    let (_, turn) = conversation(&doc);
    let mut observer = doc.observe(turn, ObserveOptions::subtree());

    doc.remove(turn).unwrap();

    assert!(observer.take_records().is_empty());
}

#[test]
fn dropped_observer_is_pruned() {
    let doc = Document::new("about:blank");
    let (main, _) = conversation(&doc);
    let observer = doc.observe(main, ObserveOptions::subtree());
    assert_eq!(doc.observer_count(), 1);

    drop(observer);
    assert_eq!(doc.observer_count(), 0);
}

#[tokio::test]
async fn disconnect_ends_observer_stream() {
    let doc = Document::new("about:blank");
    let (main, _) = conversation(&doc);
    let mut observer = doc.observe(main, ObserveOptions::subtree());

    assert!(doc.disconnect(observer.id()));
    assert!(observer.next_batch().await.is_none());
}

#[test]
fn click_runs_listeners_unless_disabled() {
    let doc = Document::new("about:blank");
    let button = doc.append(doc.body(), El::new("button")).unwrap();
    let clicks = Arc::new(AtomicUsize::new(0));
    let counter = clicks.clone();
    doc.on_click(button, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(doc.click(button));
    doc.set_attribute(button, "disabled", "").unwrap();
    assert!(!doc.click(button));
    assert_eq!(clicks.load(Ordering::SeqCst), 1);
}

#[test]
fn listeners_of_detached_nodes_are_pruned() {
    let doc = Document::new("about:blank");
    let kept = doc.append(doc.body(), El::new("button")).unwrap();
    let gone = doc.append(doc.body(), El::new("button")).unwrap();
    doc.on_click(kept, |_| {});
    doc.on_click(gone, |_| {});
    doc.on_click(gone, |_| {});

    doc.remove(gone).unwrap();
    assert_eq!(doc.prune_detached_listeners(), 1);
    assert_eq!(doc.listener_count(), 1);

    assert_eq!(doc.off_click(kept), 1);
    assert_eq!(doc.off_click(kept), 0);
    assert!(!doc.click(kept));
}

#[tokio::test]
async fn navigate_notifies_even_when_unchanged() {
    let doc = Document::new("https://chatgpt.com/c/one");
    let mut rx = doc.subscribe_location();

    doc.navigate("https://chatgpt.com/c/one");
    assert!(rx.has_changed().unwrap());
    rx.borrow_and_update();

    doc.navigate("https://chatgpt.com/c/two");
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), "https://chatgpt.com/c/two");
    assert_eq!(doc.location(), "https://chatgpt.com/c/two");
}

#[test]
fn outline_renders_nested_markup() {
    let doc = Document::new("about:blank");
    let p = doc
        .append(doc.body(), El::new("p").class("lead").text("  two\n words "))
        .unwrap();
    doc.append(p, El::new("span")).unwrap();

    let outline = doc.read(|tree| tree.outline(p));
    assert_eq!(outline, "<p class=\"lead\">\n  \"two words\"\n  <span>\n");
}
