use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use inbox_collab::storage::{DocumentStore, StoreConfig};
use inbox_collab::{
    ClientDocument, ClientMessage, CollaborationSession, CollaborativeEdit, DocumentStateStore,
    EngineConfig, Event, MemoryPersistence, Operation, RoomHub, ServerMessage, Transport,
};
use uuid::Uuid;

fn sample_edit() -> CollaborativeEdit {
    CollaborativeEdit::new(
        "agent-17",
        "ticket-4411",
        Operation::replace(120, 8, "tomorrow morning"),
        42,
        Uuid::new_v4().to_string(),
    )
}

fn draft_text(approx_chars: usize) -> String {
    let pattern = "Thanks for reaching out, we will get back to you shortly. ";
    pattern.repeat(approx_chars / pattern.len() + 1)
}

fn bench_submit_encode(c: &mut Criterion) {
    let msg = ClientMessage::Submit(sample_edit());

    c.bench_function("submit_encode", |b| {
        b.iter(|| black_box(black_box(&msg).encode().unwrap()))
    });
}

fn bench_event_decode(c: &mut Criterion) {
    let msg = ServerMessage::Event(Event::OperationApplied {
        document_id: "ticket-4411".into(),
        operation: Operation::insert(64, "Kind regards,\nSupport"),
        version: 42,
        editor_id: "agent-17".into(),
    });
    let encoded = msg.encode().unwrap();

    c.bench_function("operation_applied_decode", |b| {
        b.iter(|| black_box(ServerMessage::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_broadcast_100_editors(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("broadcast_100_editors", |b| {
        b.iter(|| {
            rt.block_on(async {
                let hub = RoomHub::new(1024);

                let mut receivers = Vec::new();
                for i in 0..100 {
                    let editor = format!("editor-{i}");
                    receivers.push(hub.connect(&editor).await);
                    hub.join_room("doc", &editor).await;
                }

                let event = Event::OperationApplied {
                    document_id: "doc".into(),
                    operation: Operation::insert(0, "x"),
                    version: 1,
                    editor_id: "editor-0".into(),
                };
                let delivered = hub
                    .broadcast_to_room("doc", black_box(&event), Some("editor-0"))
                    .await
                    .unwrap();
                black_box(delivered);
            });
        })
    });
}

fn bench_session_submit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let persistence = Arc::new(MemoryPersistence::with_documents([(
        "doc",
        draft_text(4096),
    )]));
    let store = Arc::new(DocumentStateStore::new(persistence, EngineConfig::default()));
    let hub = Arc::new(RoomHub::new(16));
    let (mut session, _rx) = rt.block_on(async {
        let rx = hub.connect("agent").await;
        let mut session = CollaborationSession::new(store.clone(), hub.clone());
        session.join("doc", "agent").await.unwrap();
        (session, rx)
    });

    c.bench_function("session_submit_4k_doc", |b| {
        let mut version = 0u64;
        b.iter(|| {
            let edit = CollaborativeEdit::new(
                "agent",
                "doc",
                Operation::insert(2048, "!"),
                version,
                "bench",
            );
            let outcome = rt.block_on(session.submit(black_box(edit))).unwrap();
            version = outcome.version;
        })
    });
}

fn bench_client_rebase(c: &mut Criterion) {
    let text = draft_text(4096);

    c.bench_function("client_rebase_8_pending", |b| {
        b.iter(|| {
            let mut doc = ClientDocument::new("doc", "agent");
            doc.reset(text.clone(), 0);
            for i in 0..8 {
                doc.edit(Operation::insert(1000 + i, "x")).unwrap();
            }
            doc.apply_remote(black_box(&Operation::delete(10, 20)), 1)
                .unwrap();
            black_box(doc.text().len());
        })
    });
}

fn bench_save_text(c: &mut Criterion) {
    let dir = std::env::temp_dir().join(format!("inbox_bench_save_{}", Uuid::new_v4()));
    let store = DocumentStore::open(StoreConfig {
        path: dir.clone(),
        ..StoreConfig::default()
    })
    .unwrap();
    let text = draft_text(4096);

    c.bench_function("save_text_4KB", |b| {
        b.iter(|| {
            black_box(store.save_text(black_box("ticket-4411"), black_box(&text)).unwrap());
        })
    });

    let _ = std::fs::remove_dir_all(&dir);
}

fn bench_load_text(c: &mut Criterion) {
    let dir = std::env::temp_dir().join(format!("inbox_bench_load_{}", Uuid::new_v4()));
    let store = DocumentStore::open(StoreConfig {
        path: dir.clone(),
        ..StoreConfig::default()
    })
    .unwrap();
    store.save_text("ticket-4411", &draft_text(4096)).unwrap();

    c.bench_function("load_text_4KB", |b| {
        b.iter(|| black_box(store.load_text(black_box("ticket-4411")).unwrap()))
    });

    let _ = std::fs::remove_dir_all(&dir);
}

criterion_group!(
    protocol_benches,
    bench_submit_encode,
    bench_event_decode,
);

criterion_group!(
    engine_benches,
    bench_broadcast_100_editors,
    bench_session_submit,
    bench_client_rebase,
);

criterion_group!(storage_benches, bench_save_text, bench_load_text);

criterion_main!(protocol_benches, engine_benches, storage_benches);
