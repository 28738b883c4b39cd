use folio::{
    ChangeQueue, Document, DocumentBody, QueueConfig, QueueError, QueueStatus, QueueUpdate,
};
use folio_api::GroupBody;

fn doc(id: &str) -> Document {
    Document::new(
        id,
        DocumentBody::Group(GroupBody {
            name: format!("group {id}"),
        }),
    )
}

#[test]
fn test_acknowledged_entry_leaves_both_lists() {
    let queue = ChangeQueue::default();
    let id = queue.enqueue("a", doc("a"));

    queue
        .update(id, QueueUpdate::status(QueueStatus::Acknowledged))
        .unwrap();

    assert!(queue.list_pending().is_empty());
    assert!(queue.list_sending().is_empty());
    assert!(queue.get(id).is_none());
}

#[test]
fn test_scheduler_loop_with_transient_and_permanent_failures() {
    let queue = ChangeQueue::new(&QueueConfig { max_attempts: 3 });
    let ok = queue.enqueue("ok", doc("ok"));
    let flaky = queue.enqueue("flaky", doc("flaky"));
    let bad = queue.enqueue("bad", doc("bad"));

    for entry in queue.list_pending() {
        queue
            .update(entry.queue_id, QueueUpdate::status(QueueStatus::Sending))
            .unwrap();
    }
    assert_eq!(queue.list_sending().len(), 3);

    queue
        .update(ok, QueueUpdate::status(QueueStatus::Acknowledged))
        .unwrap();
    queue
        .update(flaky, QueueUpdate::failed(QueueStatus::Pending, "503"))
        .unwrap();
    queue
        .update(bad, QueueUpdate::failed(QueueStatus::Rejected, "revision conflict"))
        .unwrap();

    let pending: Vec<_> = queue.list_pending().iter().map(|e| e.queue_id).collect();
    assert_eq!(pending, vec![flaky]);
    assert!(queue.list_sending().is_empty());

    let rejected = queue.list_rejected();
    assert_eq!(rejected.len(), 1);
    assert_eq!(
        rejected[0].rejection(),
        Some(QueueError::Rejected {
            id: bad,
            document_id: "bad".to_string(),
            reason: "revision conflict".to_string(),
        })
    );
    assert_eq!(queue.rejections().get(), rejected);
}

#[test]
fn test_entries_cannot_skip_pending() {
    let queue = ChangeQueue::default();
    let id = queue.enqueue("a", doc("a"));
    queue
        .update(id, QueueUpdate::status(QueueStatus::Sending))
        .unwrap();
    queue
        .update(id, QueueUpdate::status(QueueStatus::Rejected))
        .unwrap();

    let err = queue
        .update(id, QueueUpdate::status(QueueStatus::Sending))
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { .. }));

    let err = queue
        .update(id, QueueUpdate::status(QueueStatus::Acknowledged))
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { .. }));
}

#[test]
fn test_rejections_cell_notifies() {
    let queue = ChangeQueue::default();
    let counts = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = counts.clone();
    let _sub = queue
        .rejections()
        .subscribe(move |entries| sink.lock().unwrap().push(entries.len()));

    let id = queue.enqueue("a", doc("a"));
    queue
        .update(id, QueueUpdate::status(QueueStatus::Sending))
        .unwrap();
    queue
        .update(id, QueueUpdate::status(QueueStatus::Rejected))
        .unwrap();
    queue
        .update(id, QueueUpdate::status(QueueStatus::Pending))
        .unwrap();

    assert_eq!(*counts.lock().unwrap(), vec![1, 0]);
}
