use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fanout_protocol::{FrameCodec, ServerEvent, TypingIndicator};

fn bench_codec(c: &mut Criterion) {
    let codec = FrameCodec::new();

    let event = ServerEvent::Typing(TypingIndicator {
        user_id: "user-123".into(),
        user_name: "alice".into(),
        is_typing: true,
    });
    c.bench_function("encode_typing", |b| {
        b.iter(|| codec.encode(black_box(&event)))
    });

    let frame = br#"{"event":"topic:join","data":{"topicId":"ticket-123"}}"#;
    c.bench_function("decode_join", |b| {
        b.iter(|| codec.decode_command(black_box(frame)))
    });
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
