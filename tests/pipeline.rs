//! End-to-end tests: uploads in, one merged PDF (or a clean failure) out.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lopdf::{dictionary, Document, Object};
use pdfstitch::{
    fit, CancelToken, ConversionPipeline, ErrorKind, FailureReport, JobProgressCallback,
    PipelineConfig, SourceFile, StitchError, A4_GEOMETRY,
};
use pretty_assertions::assert_eq;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ── Fixtures ─────────────────────────────────────────────────────────────

fn encode(w: u32, h: u32, format: ImageFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([30, 90, 160])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

fn png(w: u32, h: u32) -> Vec<u8> {
    encode(w, h, ImageFormat::Png)
}

fn jpg(w: u32, h: u32) -> Vec<u8> {
    encode(w, h, ImageFormat::Jpeg)
}

/// A PDF whose pages carry a `/Label` string so they can be told apart
/// after merging.
fn labelled_pdf(labels: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for label in labels {
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ],
            "Label" => Object::string_literal(*label),
        });
        kids.push(Object::Reference(page_id));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => labels.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

/// One tag per page, in page order: the page label for pass-through pages,
/// `img<width>` for converted images.
fn page_tags(bytes: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(bytes).unwrap();
    doc.get_pages()
        .values()
        .map(|&id| {
            let page = doc.get_dictionary(id).unwrap();
            if let Ok(label) = page.get(b"Label").and_then(Object::as_str) {
                return String::from_utf8_lossy(label).into_owned();
            }
            let image_id = page
                .get(b"Resources")
                .and_then(Object::as_dict)
                .and_then(|r| r.get(b"XObject"))
                .and_then(Object::as_dict)
                .and_then(|x| x.get(b"Im0"))
                .and_then(Object::as_reference)
                .unwrap();
            let width = doc
                .get_object(image_id)
                .and_then(Object::as_stream)
                .unwrap()
                .dict
                .get(b"Width")
                .and_then(Object::as_i64)
                .unwrap();
            format!("img{width}")
        })
        .collect()
}

struct Workspace {
    _dir: TempDir,
    scratch: PathBuf,
    output: PathBuf,
}

/// Route library logs to the test harness; `RUST_LOG=pdfstitch=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Workspace {
    fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        Self {
            scratch: dir.path().join("uploads"),
            output: dir.path().join("output"),
            _dir: dir,
        }
    }

    fn builder(&self) -> pdfstitch::PipelineConfigBuilder {
        PipelineConfig::builder()
            .scratch_dir(&self.scratch)
            .output_dir(&self.output)
    }

    fn pipeline(&self) -> ConversionPipeline {
        ConversionPipeline::new(self.builder().build().unwrap())
    }

    fn scratch_entries(&self) -> Vec<String> {
        entries(&self.scratch)
    }

    fn output_entries(&self) -> Vec<String> {
        entries(&self.output)
    }
}

fn entries(dir: &Path) -> Vec<String> {
    let Ok(read) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = read
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn file(name: &str, bytes: Vec<u8>) -> SourceFile {
    SourceFile::new(name, bytes).unwrap()
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl JobProgressCallback for Recorder {
    fn on_job_start(&self, total_files: usize) {
        self.push(format!("job_start {total_files}"));
    }
    fn on_file_start(&self, index: usize, _name: &str) {
        self.push(format!("start {index}"));
    }
    fn on_file_complete(&self, index: usize, _name: &str, pages: Option<usize>) {
        self.push(format!("complete {index} {pages:?}"));
    }
    fn on_file_error(&self, index: usize, _name: &str, _error: &str) {
        self.push(format!("error {index}"));
    }
    fn on_job_complete(&self, output_name: &str, total_pages: Option<usize>) {
        self.push(format!("job_complete {output_name} {total_pages:?}"));
    }
}

// ── Ordering ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn mixed_inputs_keep_submission_order() {
    let ws = Workspace::new();
    let pipeline = ws.pipeline();

    let output = pipeline
        .run(vec![
            file("a.png", png(40, 20)),
            file("b.pdf", labelled_pdf(&["b1", "b2", "b3"])),
            file("c.jpg", jpg(30, 30)),
        ])
        .await
        .unwrap();

    assert_eq!(output.page_count, Some(5));
    assert_eq!(output.stats.total_files, 3);
    assert_eq!(output.stats.images_converted, 2);
    assert_eq!(output.stats.documents_passed, 1);
    assert!(!output.stats.copied_through);

    let bytes = pipeline.fetch(&output.name).await.unwrap();
    assert_eq!(bytes.len() as u64, output.size_bytes);
    assert_eq!(page_tags(&bytes), vec!["img40", "b1", "b2", "b3", "img30"]);

    // Only the merged artifact survives.
    assert_eq!(ws.output_entries(), vec![output.name.clone()]);
    assert!(ws.scratch_entries().is_empty());
}

#[tokio::test]
async fn order_does_not_depend_on_concurrency() {
    let ws = Workspace::new();
    let files = || {
        vec![
            file("1.pdf", labelled_pdf(&["p1"])),
            file("2.png", png(11, 11)),
            file("3.pdf", labelled_pdf(&["p3a", "p3b"])),
            file("4.png", png(44, 44)),
            file("5.jpeg", jpg(55, 20)),
            file("6.pdf", labelled_pdf(&["p6"])),
        ]
    };
    let expected = vec!["p1", "img11", "p3a", "p3b", "img44", "img55", "p6"];

    for concurrency in [1, 3, 16] {
        let pipeline = ConversionPipeline::new(ws.builder().concurrency(concurrency).build().unwrap());
        let output = pipeline.run(files()).await.unwrap();
        let bytes = pipeline.fetch(&output.name).await.unwrap();
        assert_eq!(page_tags(&bytes), expected, "concurrency {concurrency}");
    }
}

#[tokio::test]
async fn uppercase_extensions_are_accepted() {
    let ws = Workspace::new();
    let output = ws
        .pipeline()
        .run(vec![file("SCAN.PNG", png(8, 8)), file("Doc.Pdf", labelled_pdf(&["d"]))])
        .await
        .unwrap();
    assert_eq!(output.page_count, Some(2));
}

// ── Single inputs ────────────────────────────────────────────────────────

#[tokio::test]
async fn single_document_is_copied_byte_for_byte() {
    let ws = Workspace::new();
    let pipeline = ws.pipeline();
    let original = labelled_pdf(&["x1", "x2", "x3", "x4"]);

    let output = pipeline
        .run(vec![file("x.pdf", original.clone())])
        .await
        .unwrap();

    assert!(output.stats.copied_through);
    assert_eq!(output.page_count, Some(4));
    assert_eq!(pipeline.fetch(&output.name).await.unwrap(), original);
}

#[tokio::test]
async fn single_image_becomes_one_page() {
    let ws = Workspace::new();
    let pipeline = ws.pipeline();
    let output = pipeline.run(vec![file("x.png", png(4000, 2000))]).await.unwrap();

    let bytes = pipeline.fetch(&output.name).await.unwrap();
    assert_eq!(page_tags(&bytes), vec!["img4000"]);
    assert_eq!(output.page_count, Some(1));
}

// ── Fail-fast and cleanup ────────────────────────────────────────────────

#[tokio::test]
async fn unsupported_file_fails_whole_job_without_artifacts() {
    let ws = Workspace::new();
    let inputs = tempfile::tempdir().unwrap();
    let mut paths = Vec::new();
    for (name, bytes) in [
        ("a.png", png(10, 10)),
        ("b.pdf", labelled_pdf(&["b"])),
        ("notes.txt", b"hello".to_vec()),
        ("d.jpg", jpg(10, 10)),
    ] {
        let path = inputs.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        paths.push(path);
    }

    let err = ws
        .pipeline()
        .run_paths(&paths, &CancelToken::new())
        .await
        .unwrap_err();

    match err {
        StitchError::UnsupportedFormat { name, extension } => {
            assert!(name.ends_with("notes.txt"));
            assert_eq!(extension, ".txt");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(ws.output_entries().is_empty());
    assert!(ws.scratch_entries().is_empty());
}

#[tokio::test]
async fn oversized_file_is_rejected_at_the_boundary() {
    let ws = Workspace::new();
    let inputs = tempfile::tempdir().unwrap();
    let path = inputs.path().join("big.png");
    std::fs::write(&path, png(64, 64)).unwrap();

    let pipeline = ConversionPipeline::new(ws.builder().max_file_bytes(16).build().unwrap());
    let err = pipeline
        .run_paths(&[path], &CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileTooLarge);
    assert!(ws.output_entries().is_empty());
}

#[tokio::test]
async fn corrupt_image_fails_and_cleans_up() {
    let ws = Workspace::new();
    let recorder = Arc::new(Recorder::default());
    let pipeline = ConversionPipeline::new(
        ws.builder()
            .concurrency(1)
            .progress_callback(recorder.clone())
            .build()
            .unwrap(),
    );

    let err = pipeline
        .run(vec![
            file("a.png", png(10, 10)),
            file("broken.png", b"\x89PNG\r\n\x1a\nnot really".to_vec()),
            file("c.pdf", labelled_pdf(&["c"])),
        ])
        .await
        .unwrap_err();

    match &err {
        StitchError::Decode { name, .. } => assert_eq!(name, "broken.png"),
        other => panic!("unexpected error: {other:?}"),
    }
    let report = FailureReport::from(&err);
    assert_eq!(report.kind, ErrorKind::Decode);
    assert!(report.message.contains("broken.png"));

    let events = recorder.events();
    assert!(events.contains(&"error 1".to_string()), "{events:?}");
    // Fail-fast: with one file in flight the third is never started.
    assert!(!events.contains(&"start 2".to_string()), "{events:?}");
    assert!(!events.iter().any(|e| e.starts_with("job_complete")));

    assert!(ws.output_entries().is_empty());
    assert!(ws.scratch_entries().is_empty());
}

#[tokio::test]
async fn corrupt_document_fails_at_assembly() {
    let ws = Workspace::new();
    let err = ws
        .pipeline()
        .run(vec![
            file("good.pdf", labelled_pdf(&["g"])),
            file("bad.pdf", b"%PDF-1.4\nthis is not a pdf body".to_vec()),
            file("img.png", png(5, 5)),
        ])
        .await
        .unwrap_err();

    match err {
        StitchError::Merge { index, name, .. } => {
            assert_eq!(index, 1);
            assert_eq!(name, "bad.pdf");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(ws.output_entries().is_empty());
    assert!(ws.scratch_entries().is_empty());
}

#[tokio::test]
async fn empty_job_is_rejected() {
    let ws = Workspace::new();
    let err = ws.pipeline().run(Vec::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoFiles);
    assert!(ws.output_entries().is_empty());
}

// ── Cancellation and timeout ─────────────────────────────────────────────

#[tokio::test]
async fn cancelled_job_leaves_nothing_behind() {
    let ws = Workspace::new();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = ws
        .pipeline()
        .run_with_cancel(
            vec![file("a.png", png(10, 10)), file("b.pdf", labelled_pdf(&["b"]))],
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StitchError::Cancelled));
    assert!(ws.output_entries().is_empty());
    assert!(ws.scratch_entries().is_empty());
}

/// Cancels the job as soon as the first file starts converting.
struct CancelOnFirstFile(CancelToken);

impl JobProgressCallback for CancelOnFirstFile {
    fn on_file_start(&self, _index: usize, _name: &str) {
        self.0.cancel();
    }
}

#[tokio::test]
async fn cancellation_mid_job_stops_conversion() {
    let ws = Workspace::new();
    let cancel = CancelToken::new();
    let pipeline = ConversionPipeline::new(
        ws.builder()
            .concurrency(1)
            .progress_callback(Arc::new(CancelOnFirstFile(cancel.clone())))
            .build()
            .unwrap(),
    );

    let err = pipeline
        .run_with_cancel(
            vec![
                file("a.png", png(10, 10)),
                file("b.png", png(10, 10)),
                file("c.pdf", labelled_pdf(&["c"])),
            ],
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StitchError::Cancelled));
    assert!(ws.output_entries().is_empty());
    assert!(ws.scratch_entries().is_empty());
}

/// Stalls the job inside the conversion phase.
struct Stall(Duration);

impl JobProgressCallback for Stall {
    fn on_file_start(&self, _index: usize, _name: &str) {
        std::thread::sleep(self.0);
    }
}

#[tokio::test]
async fn slow_job_times_out_and_cleans_up() {
    let ws = Workspace::new();
    let pipeline = ConversionPipeline::new(
        ws.builder()
            .job_timeout_secs(Some(1))
            .progress_callback(Arc::new(Stall(Duration::from_millis(1500))))
            .build()
            .unwrap(),
    );

    let err = pipeline
        .run(vec![file("a.png", png(10, 10))])
        .await
        .unwrap_err();

    assert!(matches!(err, StitchError::Timeout { secs: 1 }), "{err:?}");
    assert!(ws.output_entries().is_empty());
    assert!(ws.scratch_entries().is_empty());
}

// ── Progress ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn progress_events_cover_every_file() {
    let ws = Workspace::new();
    let recorder = Arc::new(Recorder::default());
    let pipeline = ConversionPipeline::new(
        ws.builder()
            .progress_callback(recorder.clone())
            .build()
            .unwrap(),
    );

    let output = pipeline
        .run(vec![
            file("a.png", png(10, 10)),
            file("b.pdf", labelled_pdf(&["b1", "b2"])),
        ])
        .await
        .unwrap();

    let mut events = recorder.events();
    assert_eq!(events.first().map(String::as_str), Some("job_start 2"));
    assert_eq!(
        events.last().cloned(),
        Some(format!("job_complete {} Some(3)", output.name))
    );
    // Per-file events may interleave.
    events.sort();
    for expected in ["complete 0 Some(1)", "complete 1 None", "start 0", "start 1"] {
        assert!(events.contains(&expected.to_string()), "missing {expected}");
    }
}

/// Counts the files already staged when each conversion starts.
struct StagedAtStart {
    scratch: PathBuf,
    counts: Mutex<Vec<usize>>,
}

impl JobProgressCallback for StagedAtStart {
    fn on_file_start(&self, _index: usize, _name: &str) {
        let staged: usize = entries(&self.scratch)
            .iter()
            .map(|job_dir| entries(&self.scratch.join(job_dir)).len())
            .sum();
        self.counts.lock().unwrap().push(staged);
    }
}

#[tokio::test]
async fn file_start_fires_after_every_file_is_staged() {
    let ws = Workspace::new();
    let watcher = Arc::new(StagedAtStart {
        scratch: ws.scratch.clone(),
        counts: Mutex::new(Vec::new()),
    });
    let pipeline = ConversionPipeline::new(
        ws.builder()
            .concurrency(1)
            .progress_callback(watcher.clone())
            .build()
            .unwrap(),
    );

    pipeline
        .run(vec![
            file("a.pdf", labelled_pdf(&["a"])),
            file("b.png", png(12, 12)),
            file("c.pdf", labelled_pdf(&["c"])),
        ])
        .await
        .unwrap();

    let counts = watcher.counts.lock().unwrap().clone();
    assert_eq!(counts.len(), 3);
    assert_eq!(counts[0], 3, "first conversion started before staging finished");
}

// ── Output store ─────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_jobs_get_distinct_outputs() {
    let ws = Workspace::new();
    let pipeline = ws.pipeline();

    let (a, b) = tokio::join!(
        pipeline.run(vec![file("a.pdf", labelled_pdf(&["a"]))]),
        pipeline.run(vec![file("b.png", png(9, 9))]),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.name, b.name);
    assert_ne!(a.job_id, b.job_id);
    assert!(a.name.starts_with("merged_") && a.name.ends_with(".pdf"));
    assert_eq!(ws.output_entries().len(), 2);
    assert!(ws.scratch_entries().is_empty());
}

#[tokio::test]
async fn custom_prefix_names_output() {
    let ws = Workspace::new();
    let pipeline = ConversionPipeline::new(ws.builder().output_prefix("batch-7").build().unwrap());
    let output = pipeline.run(vec![file("a.png", png(3, 3))]).await.unwrap();
    assert!(output.name.starts_with("batch-7_"), "{}", output.name);
    assert!(output.path.starts_with(&ws.output));
}

#[test]
fn fetching_unknown_output_is_not_found() {
    let ws = Workspace::new();
    let pipeline = ws.pipeline();
    let err = tokio_test::block_on(pipeline.fetch("merged_19700101_000000_deadbeef.pdf"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = tokio_test::block_on(pipeline.fetch("../escape.pdf")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn run_sync_drives_a_job() {
    let ws = Workspace::new();
    let output = ws
        .pipeline()
        .run_sync(vec![file("a.jpg", jpg(12, 12))])
        .unwrap();
    assert_eq!(output.page_count, Some(1));
    assert_eq!(ws.output_entries(), vec![output.name]);
}

// ── Page fitting ─────────────────────────────────────────────────────────

#[test]
fn wide_image_is_width_bound() {
    let placement = fit(4000, 2000, &A4_GEOMETRY).unwrap();
    let scale = 190.0 / 4000.0;
    assert!((placement.scale - scale).abs() < 1e-12);
    assert!((placement.render_width - 190.0).abs() < 1e-9);
    assert!((placement.render_height - 2000.0 * scale).abs() < 1e-9);
    assert!((placement.offset_x - 10.0).abs() < 1e-9);
    assert!((placement.offset_y - (297.0 - 95.0) / 2.0).abs() < 1e-9);
}

#[test]
fn fitting_is_idempotent() {
    for (w, h) in [(1, 1), (190, 277), (191, 10), (800, 3000)] {
        assert_eq!(
            fit(w, h, &A4_GEOMETRY).unwrap(),
            fit(w, h, &A4_GEOMETRY).unwrap()
        );
    }
}
