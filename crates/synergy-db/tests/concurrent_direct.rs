use std::sync::{Arc, Barrier};
use std::thread;

use synergy_db::Database;
use synergy_types::models::PrincipalRole;
use uuid::Uuid;

#[test]
fn concurrent_direct_creation_converges() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("synergy.db");

    let ada = Uuid::new_v4();
    let bob = Uuid::new_v4();
    {
        let db = Database::open(&path).unwrap();
        db.upsert_principal(ada, "ada", PrincipalRole::Regular).unwrap();
        db.upsert_principal(bob, "bob", PrincipalRole::Regular).unwrap();
    }

    // Separate handles so the race happens inside SQLite, not on our mutex
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let path = path.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let db = Database::open(&path).unwrap();
                barrier.wait();
                let (a, b) = if i % 2 == 0 { (ada, bob) } else { (bob, ada) };
                db.get_or_create_direct(a, b).unwrap().id
            })
        })
        .collect();

    let ids: Vec<Uuid> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.iter().all(|id| *id == ids[0]));

    let db = Database::open(&path).unwrap();
    let listed = db.list_conversations_for(ada).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].participants.len(), 2);
}

#[test]
fn unread_counters_follow_send_and_read() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("synergy.db")).unwrap();

    let ada = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let cy = Uuid::new_v4();
    for (id, name) in [(ada, "ada"), (bob, "bob"), (cy, "cy")] {
        db.upsert_principal(id, name, PrincipalRole::Regular).unwrap();
    }
    let group = db.create_group(ada, Some("launch"), &[bob, cy]).unwrap();

    for text in ["one", "two", "three"] {
        let draft = synergy_types::draft::MessageDraft::text(text).validate().unwrap();
        db.create_message(group.id, ada, draft).unwrap();
    }

    let conv = db.get_conversation(group.id).unwrap();
    assert_eq!(conv.unread_for(ada), 0);
    assert_eq!(conv.unread_for(bob), 3);
    assert_eq!(conv.unread_for(cy), 3);

    db.mark_many_read(group.id, bob).unwrap();
    let conv = db.get_conversation(group.id).unwrap();
    assert_eq!(conv.unread_for(bob), 0);
    assert_eq!(conv.unread_for(cy), 3);

    // Read by only one of two recipients: not yet fully read
    let page = db.list_messages(group.id, ada, 1, 50).unwrap();
    assert!(page.messages.iter().all(|m| m.is_read_by(bob) && !m.is_read_by(cy)));
    assert!(page
        .messages
        .iter()
        .all(|m| m.delivery_status != synergy_types::models::DeliveryStatus::Read));
}
