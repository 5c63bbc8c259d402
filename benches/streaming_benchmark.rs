use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use json_excelstream::fast_writer::FastWorkbook;
use json_excelstream::json_stream::{count_elements, open_elements};
use json_excelstream::{
    ConversionService, ConvertConfig, JobRequest, Mapping, MappingEntry, NoopProgress,
    StreamingTransformer, UploadedFile,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_records(dir: &Path, size: usize) -> PathBuf {
    let path = dir.join(format!("records_{}.json", size));
    let mut json = String::from("[");
    for i in 0..size {
        if i > 0 {
            json.push(',');
        }
        json.push_str(&format!(
            r#"{{"id":{},"name":"Name_{}","value":{},"tags":["a","b"]}}"#,
            i,
            i,
            i * 100
        ));
    }
    json.push(']');
    fs::write(&path, json).unwrap();
    path
}

fn write_template(dir: &Path) -> PathBuf {
    let path = dir.join("format.xlsx");
    let mut workbook = FastWorkbook::new(&path).unwrap();
    workbook.add_worksheet("Format").unwrap();
    workbook.write_row(&["Header", "ID", "Name", "Value"]).unwrap();
    workbook.write_row(&["Field", "id", "[name]", "value"]).unwrap();
    workbook.close().unwrap();
    path
}

fn benchmark_count_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("count_pass");
    let dir = TempDir::new().unwrap();

    for size in [1000, 10000, 100000].iter() {
        let data = write_records(dir.path(), *size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(count_elements(&data).unwrap()));
        });
    }

    group.finish();
}

fn benchmark_element_stream(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let data = write_records(dir.path(), 10000);

    c.bench_function("element_stream_10000", |b| {
        b.iter(|| {
            for element in open_elements(&data).unwrap() {
                black_box(element.unwrap());
            }
        });
    });
}

fn benchmark_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform");
    let dir = TempDir::new().unwrap();
    let mapping = Mapping::new(vec![
        MappingEntry::new("ID", "id"),
        MappingEntry::new("Name", "name"),
        MappingEntry::new("Value", "value"),
        MappingEntry::new("Tags", "tags"),
    ]);

    for size in [1000, 10000, 100000].iter() {
        let data = write_records(dir.path(), *size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let out = TempDir::new().unwrap();
                let config = ConvertConfig::new(out.path());
                let summary = StreamingTransformer::new(&mapping, &config)
                    .run(&data, &out.path().join("out.xlsx"), &mut NoopProgress)
                    .unwrap();
                black_box(summary);
            });
        });
    }

    group.finish();
}

fn benchmark_batch_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_size");
    let dir = TempDir::new().unwrap();
    let data = write_records(dir.path(), 50000);
    let mapping = Mapping::new(vec![
        MappingEntry::new("ID", "id"),
        MappingEntry::new("Name", "name"),
    ]);

    for batch in [1, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(batch), batch, |b, &batch| {
            b.iter(|| {
                let out = TempDir::new().unwrap();
                let config = ConvertConfig::new(out.path()).batch_size(batch);
                StreamingTransformer::new(&mapping, &config)
                    .run(&data, &out.path().join("out.xlsx"), &mut NoopProgress)
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn benchmark_full_job(c: &mut Criterion) {
    let inputs = TempDir::new().unwrap();
    let template = write_template(inputs.path());
    let data = write_records(inputs.path(), 10000);

    c.bench_function("full_job_10000", |b| {
        b.iter(|| {
            let out = TempDir::new().unwrap();
            let config = ConvertConfig::new(out.path()).remove_inputs_on_success(false);
            let service = ConversionService::new(config);
            let outcome = service
                .convert_with(
                    JobRequest {
                        template: UploadedFile::from_path(&template),
                        data: UploadedFile::from_path(&data),
                    },
                    &mut NoopProgress,
                )
                .unwrap();
            black_box(service.retrieve(&outcome.artifact).unwrap().bytes.len());
        });
    });
}

criterion_group!(
    benches,
    benchmark_count_pass,
    benchmark_element_stream,
    benchmark_transform,
    benchmark_batch_size,
    benchmark_full_job
);
criterion_main!(benches);
