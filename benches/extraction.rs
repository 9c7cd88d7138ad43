//! 值提取基准测试
//!
//! 测试 JSON/XML/文本提取与指标键渲染的性能

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use url_monitor::check::{KeyTemplate, TemplateContext};
use url_monitor::extract::{ExtractorRegistry, JsonExtractor, TextExtractor, ValueExtractor, XmlExtractor};

const JSON_BODY: &str = r#"{
    "status": "up",
    "version": "2.4.1",
    "queues": [
        {"name": "ingest", "depth": 12, "consumers": 4},
        {"name": "export", "depth": 0, "consumers": 2}
    ],
    "database": {"latency_ms": 3.7, "pool": {"active": 8, "idle": 24}}
}"#;

const XML_BODY: &str = r#"<?xml version="1.0"?>
<health version="2.4.1">
    <status>up</status>
    <queues>
        <queue name="ingest"><depth>12</depth></queue>
        <queue name="export"><depth>0</depth></queue>
    </queues>
</health>"#;

const TEXT_BODY: &str = "uptime: 86400\nload average: 0.42, 0.38, 0.35\nconnections: 128\n";

/// 单个提取策略基准测试
fn extractor_benchmark(c: &mut Criterion) {
    c.bench_function("json_extract_nested", |b| {
        b.iter(|| {
            let value = JsonExtractor.extract(black_box(JSON_BODY), "$.database.pool.active");
            black_box(value)
        });
    });

    c.bench_function("json_extract_array_index", |b| {
        b.iter(|| {
            let value = JsonExtractor.extract(black_box(JSON_BODY), "$.queues[1].depth");
            black_box(value)
        });
    });

    c.bench_function("xml_extract_positional", |b| {
        b.iter(|| {
            let value = XmlExtractor.extract(black_box(XML_BODY), "/health/queues/queue[2]/depth");
            black_box(value)
        });
    });

    c.bench_function("xml_extract_attribute", |b| {
        b.iter(|| {
            let value = XmlExtractor.extract(black_box(XML_BODY), "//queue/@name");
            black_box(value)
        });
    });

    c.bench_function("text_extract_capture", |b| {
        b.iter(|| {
            let value = TextExtractor.extract(black_box(TEXT_BODY), r"load average: ([\d.]+)");
            black_box(value)
        });
    });
}

/// 按 response_type 分派与键渲染基准测试
fn registry_and_template_benchmark(c: &mut Criterion) {
    let registry = ExtractorRegistry::with_defaults();

    c.bench_function("registry_dispatch_json", |b| {
        b.iter(|| {
            let value = registry.extract(black_box(JSON_BODY), "JSON", "$.status");
            black_box(value)
        });
    });

    let template = KeyTemplate::parse("url_monitor[{checkname},{key},{datatype},{originhost}]")
        .expect("模板应能解析");

    c.bench_function("key_template_render", |b| {
        b.iter(|| {
            let context = TemplateContext::new()
                .with("checkname", "api")
                .with("key", "queue_depth")
                .with("datatype", "int")
                .with("originhost", "api.example.com");
            black_box(template.render(&context))
        });
    });
}

criterion_group!(benches, extractor_benchmark, registry_and_template_benchmark);
criterion_main!(benches);
