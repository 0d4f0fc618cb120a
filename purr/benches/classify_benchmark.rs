use criterion::{black_box, criterion_group, criterion_main, Criterion};
use purr_vault::analysis::{bounded_sample, ClassificationAnalysisService, PatternAnalysis};
use purr_vault::classification::classify;
use purr_vault::SourceFormat;

fn bench_classify(c: &mut Criterion) {
    let code = "fn main() {\n    let mut total = 0;\n    for i in 0..10 {\n        total += i;\n    }\n}\n".repeat(50);
    let prose = "The quick brown fox jumps over the lazy dog. ".repeat(400);
    let html = format!("<html><body><p>{}</p></body></html>", prose);
    let files = "/Users/me/Pictures/a.png\n/Users/me/Pictures/b.jpg\n/Users/me/Documents/c.pdf";

    let inputs: Vec<(&str, SourceFormat, Vec<u8>)> = vec![
        ("url", SourceFormat::PlainText, b"https://example.com/path?query=1".to_vec()),
        ("hex_color", SourceFormat::PlainText, b"#ff8800".to_vec()),
        ("code", SourceFormat::PlainText, code.into_bytes()),
        ("prose", SourceFormat::PlainText, prose.clone().into_bytes()),
        ("html", SourceFormat::Html, html.into_bytes()),
        ("file_list", SourceFormat::FilePathList, files.as_bytes().to_vec()),
    ];

    let mut group = c.benchmark_group("classify");
    for (name, format, raw) in &inputs {
        group.bench_function(*name, |b| b.iter(|| classify(black_box(format), black_box(raw))));
    }
    group.finish();

    let analysis = PatternAnalysis;
    let mut group = c.benchmark_group("analysis");
    group.sample_size(20);
    group.bench_function("prose_sample", |b| {
        b.iter(|| analysis.analyze(bounded_sample(black_box(&prose))))
    });
    group.finish();
}

criterion_group!(benches, bench_classify);
criterion_main!(benches);
