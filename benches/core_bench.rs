//! Benchmarks for simsweep core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use simsweep::core::{config, manifest, xpath};
use std::path::Path;

fn bench_manifest_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("manifest_codec");
    for n in [10, 1_000, 100_000] {
        // Mostly contiguous with a gap every 7 ids.
        let ids: Vec<i64> = (1..=n).filter(|i| i % 7 != 0).collect();
        let text = manifest::encode(&ids);
        group.bench_with_input(BenchmarkId::new("encode", n), &ids, |b, ids| {
            b.iter(|| black_box(manifest::encode(black_box(ids))));
        });
        group.bench_with_input(BenchmarkId::new("decode", n), &text, |b, text| {
            b.iter(|| black_box(manifest::decode(black_box(text), Path::new("bench")).unwrap()));
        });
    }
    group.finish();
}

fn settings_document(cell_types: usize) -> xmltree::Element {
    let mut xml = String::from("<PhysiCell_settings><cell_definitions>");
    for i in 0..cell_types {
        xml.push_str(&format!(
            "<cell_definition name=\"type_{i}\"><phenotype><motility>\
             <speed>1.0</speed><persistence_time>5</persistence_time>\
             </motility></phenotype></cell_definition>"
        ));
    }
    xml.push_str("</cell_definitions></PhysiCell_settings>");
    xmltree::Element::parse(xml.as_bytes()).unwrap()
}

fn bench_xpath_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("xpath_resolve");
    for n in [4, 32, 256] {
        let doc = settings_document(n);
        let path = xpath::motility_path(&format!("type_{}", n - 1), "speed");
        group.bench_with_input(BenchmarkId::from_parameter(n), &doc, |b, doc| {
            b.iter(|| black_box(xpath::get_field(black_box(doc), &path).unwrap()));
        });
    }
    group.finish();
}

fn bench_xpath_parse(c: &mut Criterion) {
    let text = "cell_definitions/cell_definition:name:tumor/phenotype/death/model:code:100/death_rate";
    c.bench_function("xpath_parse", |b| {
        b.iter(|| black_box(black_box(text).parse::<xpath::XmlPath>().unwrap()));
    });
}

fn bench_config_parse(c: &mut Criterion) {
    let yaml = r#"
version: "1.0"
data_dir: data
program_dir: PhysiCell
max_parallel: 8
build:
  command: ["make", "-j", "8"]
  compiler: g++
  macros: [ADDON_PHYSIECM]
prune:
  svg: true
  mat: true
"#;
    c.bench_function("config_parse", |b| {
        b.iter(|| black_box(config::parse_config(black_box(yaml)).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_manifest_codec,
    bench_xpath_resolve,
    bench_xpath_parse,
    bench_config_parse
);
criterion_main!(benches);
