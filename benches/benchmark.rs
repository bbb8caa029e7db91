use criterion::{black_box, criterion_group, criterion_main, Criterion};
use page_archiver::{
    extract_redirect_target, parse_archived_timestamp, strip_wip_marker, validate_url,
    ArchiveRequest, ArchiveResult, Config,
};
use std::time::Duration;

// Fast settings for all benchmarks
fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

fn benchmark_config_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("config");
    configure_fast_group(&mut group);

    group.bench_function("creation", |b| {
        b.iter(|| {
            let config = Config::default();
            black_box(config);
        });
    });

    group.bench_function("validation", |b| {
        let config = Config::default();
        b.iter(|| black_box(config.validate().is_ok()));
    });

    group.finish();
}

fn benchmark_request_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("archive_request");
    configure_fast_group(&mut group);

    group.bench_function("creation", |b| {
        b.iter(|| {
            let request = ArchiveRequest::new(black_box("https://example.com/article"));
            black_box(request);
        });
    });

    group.finish();
}

fn benchmark_url_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("url_validation");
    configure_fast_group(&mut group);

    let test_urls = vec![
        "https://example.com",
        "http://example.com/path?query=1",
        "ftp://example.com",
        "invalid-url",
    ];

    group.bench_function("validate", |b| {
        b.iter(|| {
            for url in &test_urls {
                let _ = black_box(validate_url(black_box(url)));
            }
        });
    });

    group.finish();
}

fn benchmark_capture_url_handling(c: &mut Criterion) {
    let mut group = c.benchmark_group("capture_url");
    configure_fast_group(&mut group);

    group.bench_function("strip_wip_marker", |b| {
        b.iter(|| black_box(strip_wip_marker(black_box("https://archive.ph/wip/AbCdE"))));
    });

    group.bench_function("strip_wip_marker_noop", |b| {
        b.iter(|| black_box(strip_wip_marker(black_box("https://archive.ph/AbCdE"))));
    });

    let page = format!(
        "<html><body>{}<script>document.location.replace(\"https://archive.ph/wip/AbCdE\")</script></body></html>",
        "<div>Loading</div>".repeat(200)
    );
    group.bench_function("extract_redirect_target", |b| {
        b.iter(|| black_box(extract_redirect_target(black_box(&page))));
    });

    group.finish();
}

fn benchmark_date_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("archived_timestamp");
    configure_fast_group(&mut group);

    group.bench_function("full", |b| {
        b.iter(|| black_box(parse_archived_timestamp(black_box("archived 2 Jan 2023 14:03:21 UTC"))));
    });

    group.bench_function("date_only", |b| {
        b.iter(|| black_box(parse_archived_timestamp(black_box("archived 17 Mar 2019"))));
    });

    group.bench_function("unparseable", |b| {
        b.iter(|| black_box(parse_archived_timestamp(black_box("archived recently"))));
    });

    group.finish();
}

fn benchmark_result_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("archive_result");
    configure_fast_group(&mut group);

    let archive_org = ArchiveResult {
        archive_org_url: Some("https://web.archive.org/web/2024/https://example.com/".to_string()),
        archive_org_short_url: Some("https://v.gd/abcde".to_string()),
        archive_today_url: None,
    };
    let archive_today = ArchiveResult {
        archive_today_url: Some("https://archive.ph/AbCdE".to_string()),
        ..Default::default()
    };

    group.bench_function("merge", |b| {
        b.iter(|| black_box(archive_org.clone().merge(archive_today.clone())));
    });

    group.bench_function("serialize", |b| {
        let merged = archive_org.clone().merge(archive_today.clone());
        b.iter(|| black_box(serde_json::to_string(&merged)));
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_config_creation,
    benchmark_request_creation,
    benchmark_url_validation,
    benchmark_capture_url_handling,
    benchmark_date_parsing,
    benchmark_result_merge
);

criterion_main!(benches);
