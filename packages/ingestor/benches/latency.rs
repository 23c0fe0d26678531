//! Latency benchmarks for the ingestor pipeline
//!
//! Covers the per-transaction hot path:
//! - Classify every output
//! - Decode the matched payload
//! - Re-render the history window

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use memoscope_ingestor::decoder::{decode_feed_message, decode_payload, FeedMessage, LossyPolicy};
use memoscope_ingestor::filter::{classify, MemoAction};
use memoscope_ingestor::history::MemoEntry;
use memoscope_ingestor::profile::{ProfileError, ProfileInfo, ProfileLookup};
use memoscope_ingestor::render::Renderer;

struct StaticLookup;

impl ProfileLookup for StaticLookup {
    async fn lookup(&self, address: &str) -> Result<ProfileInfo, ProfileError> {
        Ok(ProfileInfo {
            address: address.to_string(),
            display_name: "bench".to_string(),
            avatar_url: "https://memo.cash/img/default.png".to_string(),
        })
    }
}

fn post_script(text: &str) -> String {
    format!("6a026d02{:02x}{}", text.len(), hex::encode(text))
}

/// Benchmark output classification
fn bench_classify(c: &mut Criterion) {
    let memo = post_script("gm from the mempool");
    let p2pkh = "76a91489abcdefabbaabbaabbaabbaabbaabbaabbaabba88ac";

    c.bench_function("classify_memo", |b| b.iter(|| black_box(classify(black_box(&memo)))));
    c.bench_function("classify_non_memo", |b| {
        b.iter(|| black_box(classify(black_box(p2pkh))))
    });
}

/// Benchmark feed record parsing plus payload decoding
fn bench_decode(c: &mut Criterion) {
    let script = post_script("Check out https://www.example.com/some/long/path?with=query");
    let raw = serde_json::to_string(&FeedMessage::from_parts(
        "3f2a",
        1703000000,
        "qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a",
        &["76a91489abcdefabbaabbaabbaabbaabbaabbaabbaabba88ac", &script],
    ))
    .unwrap();

    c.bench_function("decode_feed_message", |b| {
        b.iter(|| black_box(decode_feed_message(black_box(&raw)).unwrap()))
    });
    c.bench_function("decode_payload", |b| {
        b.iter(|| {
            black_box(decode_payload(MemoAction::Post, black_box(&script), LossyPolicy::Drop).unwrap())
        })
    });
}

/// Benchmark rendering a full window with cached profiles
fn bench_render(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let entries: Vec<MemoEntry> = (0..5)
        .map(|i| {
            MemoEntry::new(
                1703000000 + i,
                format!("memo {i} with a link https://memo.cash/post/{i}"),
                format!("addr{i}"),
            )
        })
        .collect();
    let mut renderer = Renderer::with_profiles(StaticLookup);

    c.bench_function("render_window", |b| {
        b.iter(|| black_box(runtime.block_on(renderer.render(black_box(&entries))).unwrap()))
    });
}

criterion_group!(benches, bench_classify, bench_decode, bench_render);

criterion_main!(benches);
