//! End-to-end ingest runs against an in-memory article server

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeTransport, TestPipeline, pipeline, test_config};
use nzbstream_index::{IndexStore, LogicalNode, NodeId, NodeKind, find_path};
use nzbstream_ingest::{
    HistoryStatus, IngestOutcome, IngestUnit, Manifest, NzbFile, ProgressReporter,
};
use nzbstream_pool::CancellationToken;
use pretty_assertions::assert_eq;
use test_utils::rar::{Rar5Entry, Rar5Volume};
use test_utils::sevenzip::SevenZipBuilder;
use test_utils::{fake_mkv, init_test_logging, pattern};

fn unit() -> IngestUnit {
    IngestUnit::new("job-1", "Some.Movie.2024", "movies")
}

async fn run(pipeline: &TestPipeline, files: Vec<NzbFile>) -> IngestOutcome {
    pipeline
        .ingest(
            &Manifest::new(files),
            &unit(),
            &CancellationToken::new(),
            &ProgressReporter::disabled(),
        )
        .await
        .unwrap()
}

async fn job_files(pipeline: &TestPipeline, root: NodeId) -> Vec<LogicalNode> {
    let mut files = pipeline.store().children(root).await.unwrap();
    files.sort_by(|a, b| a.name.cmp(&b.name));
    files
}

/// Three stored RAR5 volumes carrying one file split across all of them
fn rar_set(movie: &[u8]) -> Vec<(String, Vec<u8>)> {
    let third = movie.len() / 3;
    let pieces = [&movie[..third], &movie[third..2 * third], &movie[2 * third..]];
    pieces
        .iter()
        .enumerate()
        .map(|(i, piece)| {
            let mut entry = Rar5Entry::stored("movie.mkv", piece.len() as u64, movie.len() as u64);
            entry.split_before = i > 0;
            entry.split_after = i < 2;
            let mut volume = Rar5Volume::new().volume_number(Some(i as i32));
            if i < 2 {
                volume = volume.more_volumes();
            }
            let data = volume.file(entry, piece).build();
            (format!("Some.Movie.2024.part{}.rar", i + 1), data)
        })
        .collect()
}

#[tokio::test]
async fn test_rar_set_is_indexed_in_volume_order() {
    init_test_logging();
    let movie = fake_mkv(9000, 7);
    let volumes = rar_set(&movie);
    let transport = Arc::new(FakeTransport::new());
    let mut files: Vec<NzbFile> = volumes
        .iter()
        .map(|(name, data)| transport.post(name, data, 1024))
        .collect();
    files.swap(0, 2);
    let pipeline = pipeline(transport, test_config());

    let IngestOutcome::Completed { root, files, .. } = run(&pipeline, files).await else {
        unreachable!("a stored RAR set ingests");
    };
    assert_eq!(files, 1);

    let nodes = job_files(&pipeline, root).await;
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].name, "movie.mkv");
    assert_eq!(nodes[0].kind, NodeKind::MultipartFile);
    assert_eq!(nodes[0].size, Some(9000));

    let layout = pipeline.store().layout(nodes[0].id).await.unwrap().unwrap();
    assert_eq!(layout.parts.len(), 3);
    let mut joined = Vec::new();
    for ((name, data), part) in volumes.iter().zip(&layout.parts) {
        assert_eq!(part.segment_ids[0], format!("{name}-1@test"));
        assert_eq!(part.segment_range.count(), data.len() as i64);
        let content = part.content_range;
        joined.extend_from_slice(&data[content.start as usize..content.end as usize]);
    }
    assert_eq!(joined, movie);

    let history = pipeline.history().all();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Completed);
    assert_eq!(history[0].root, Some(root));
}

#[tokio::test]
async fn test_second_run_reuses_existing_tree() {
    let transport = Arc::new(FakeTransport::new());
    let files = vec![transport.post("movie.mkv", &fake_mkv(3000, 1), 1000)];
    let pipeline = pipeline(transport.clone(), test_config());

    let IngestOutcome::Completed { root, .. } = run(&pipeline, files.clone()).await else {
        unreachable!("a stored file ingests");
    };
    let fetched = transport.body_fetches();
    let nodes = pipeline.store().node_count();

    assert_eq!(
        run(&pipeline, files).await,
        IngestOutcome::AlreadyCompleted { root }
    );
    assert_eq!(transport.body_fetches(), fetched);
    assert_eq!(pipeline.store().node_count(), nodes);
    assert_eq!(pipeline.history().all().len(), 2);
}

#[tokio::test]
async fn test_unimportant_file_without_first_article_is_skipped() {
    let transport = Arc::new(FakeTransport::new());
    let files = vec![
        transport.post("release.nfo", &pattern(300, 2), 1000),
        transport.post("movie.mkv", &fake_mkv(2500, 3), 1000),
    ];
    transport.remove("release.nfo-1@test");
    let pipeline = pipeline(transport, test_config());

    let IngestOutcome::Completed { root, files, .. } = run(&pipeline, files).await else {
        unreachable!("the movie alone is enough");
    };
    assert_eq!(files, 1);
    let nodes = job_files(&pipeline, root).await;
    assert_eq!(nodes[0].name, "movie.mkv");
    assert_eq!(nodes[0].kind, NodeKind::StoredFile);
    assert_eq!(nodes[0].size, Some(2500));
}

#[tokio::test]
async fn test_sevenzip_entry_spans_volumes() {
    let movie = fake_mkv(3000, 4);
    let archive = SevenZipBuilder::new()
        .file("movie.mkv", &movie)
        .file("notes.txt", &pattern(100, 5))
        .encode_header()
        .build();
    let transport = Arc::new(FakeTransport::new());
    let files = vec![
        transport.post("Some.Movie.2024.7z.002", &archive[2000..], 700),
        transport.post("Some.Movie.2024.7z.001", &archive[..2000], 700),
    ];
    let pipeline = pipeline(transport, test_config());

    let IngestOutcome::Completed { root, files, .. } = run(&pipeline, files).await else {
        unreachable!("a stored 7z set ingests");
    };
    assert_eq!(files, 2);

    let nodes = job_files(&pipeline, root).await;
    let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["movie.mkv", "notes.txt"]);
    assert_eq!(nodes[0].kind, NodeKind::RawArchiveEntry);
    assert_eq!(nodes[0].size, Some(3000));

    let layout = pipeline.store().layout(nodes[0].id).await.unwrap().unwrap();
    assert_eq!(layout.parts.len(), 2);
    let sizes: Vec<_> = layout.parts.iter().map(|p| p.content_range.count()).collect();
    assert_eq!(sizes, vec![2000 - 32, 3000 - (2000 - 32)]);
    assert_eq!(layout.parts[1].content_range.start, 0);
}

#[tokio::test]
async fn test_split_media_is_joined() {
    let movie = fake_mkv(4000, 6);
    let transport = Arc::new(FakeTransport::new());
    let files = vec![
        transport.post("Some.Movie.2024.mkv.002", &movie[2500..], 1000),
        transport.post("Some.Movie.2024.mkv.001", &movie[..2500], 1000),
    ];
    let pipeline = pipeline(transport, test_config());

    let IngestOutcome::Completed { root, .. } = run(&pipeline, files).await else {
        unreachable!("split media ingests");
    };
    let nodes = job_files(&pipeline, root).await;
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].name, "Some.Movie.2024.mkv");
    assert_eq!(nodes[0].kind, NodeKind::MultipartFile);
    assert_eq!(nodes[0].size, Some(4000));

    let layout = pipeline.store().layout(nodes[0].id).await.unwrap().unwrap();
    let pieces: Vec<_> = layout
        .parts
        .iter()
        .map(|p| (p.segment_ids[0].as_str(), p.content_range.count()))
        .collect();
    assert_eq!(
        pieces,
        vec![
            ("Some.Movie.2024.mkv.001-1@test", 2500),
            ("Some.Movie.2024.mkv.002-1@test", 1500)
        ]
    );
}

#[tokio::test]
async fn test_compressed_archive_fails_without_touching_index() {
    let data = pattern(500, 8);
    let mut entry = Rar5Entry::stored("movie.mkv", 500, 500);
    entry.method = 3;
    let volume = Rar5Volume::new().file(entry, &data).build();
    let transport = Arc::new(FakeTransport::new());
    let files = vec![transport.post("Some.Movie.2024.rar", &volume, 256)];
    let pipeline = pipeline(transport, test_config());

    let IngestOutcome::Failed { message } = run(&pipeline, files).await else {
        unreachable!("compressed archives cannot be streamed");
    };
    assert!(!message.is_empty());
    assert_eq!(pipeline.store().node_count(), 1);

    let history = pipeline.history().all();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Failed);
    assert_eq!(history[0].message.as_deref(), Some(message.as_str()));
}

#[tokio::test]
async fn test_transient_failure_is_queued() {
    let transport = Arc::new(FakeTransport::new());
    let files = vec![transport.post("movie.mkv", &fake_mkv(2000, 9), 1000)];
    transport.fail_transiently("movie.mkv-1@test");
    let pipeline = pipeline(transport, test_config());

    let IngestOutcome::Queued { retry_at, .. } = run(&pipeline, files).await else {
        unreachable!("transient errors are retried later");
    };
    assert!(retry_at > chrono::Utc::now());
    assert!(pipeline.history().all().is_empty());
    assert_eq!(pipeline.store().node_count(), 1);
}

#[tokio::test]
async fn test_caller_cancellation_abandons_run() {
    let transport = Arc::new(FakeTransport::new());
    let files = vec![
        transport.post("movie.mkv", &fake_mkv(2000, 10), 1000),
        transport.post("extras.mkv", &fake_mkv(2000, 11), 1000),
    ];
    let cancel = CancellationToken::new();
    transport.cancel_after(1, cancel.clone());
    let pipeline = pipeline(transport, test_config());

    let outcome = pipeline
        .ingest(
            &Manifest::new(files),
            &unit(),
            &cancel,
            &ProgressReporter::disabled(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Abandoned);
    assert_eq!(pipeline.store().node_count(), 1);
    assert!(pipeline.history().all().is_empty());
}

#[tokio::test]
async fn test_lone_obfuscated_member_takes_job_name() {
    let data = fake_mkv(1500, 12);
    let entry = Rar5Entry::stored("d41d8cd98f00b204e9800998ecf8427e.mkv", 1500, 1500);
    let volume = Rar5Volume::new().file(entry, &data).build();
    let transport = Arc::new(FakeTransport::new());
    let files = vec![transport.post("a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6.rar", &volume, 512)];
    let pipeline = pipeline(transport, test_config());

    let IngestOutcome::Completed { .. } = run(&pipeline, files).await else {
        unreachable!("an obfuscated set still ingests");
    };
    let path = ["content", "movies", "Some.Movie.2024", "Some.Movie.2024.mkv"];
    let node = find_path(&**pipeline.store(), &path).await.unwrap();
    assert_eq!(node.map(|n| n.size), Some(Some(1500)));
}

#[tokio::test]
async fn test_obfuscated_volume_names_form_one_set() {
    let movie = fake_mkv(9000, 14);
    let transport = Arc::new(FakeTransport::new());
    let names = [
        "3b5d5c3712955042212316173ccf37be",
        "0cc175b9c0f1b6a831c399e269772661",
        "92eb5ffee6ae2fec3ad71c777531578f",
    ];
    let files: Vec<NzbFile> = rar_set(&movie)
        .iter()
        .zip(names)
        .map(|((_, data), name)| transport.post(name, data, 1024))
        .collect();
    let pipeline = pipeline(transport, test_config());

    let IngestOutcome::Completed { root, files, .. } = run(&pipeline, files).await else {
        unreachable!("volumes are joined by their shared member");
    };
    assert_eq!(files, 1);
    let nodes = job_files(&pipeline, root).await;
    assert_eq!(nodes[0].name, "movie.mkv");
    assert_eq!(nodes[0].size, Some(9000));
    let layout = pipeline.store().layout(nodes[0].id).await.unwrap().unwrap();
    let firsts: Vec<_> = layout.parts.iter().map(|p| p.segment_ids[0].as_str()).collect();
    assert_eq!(
        firsts,
        vec![
            "3b5d5c3712955042212316173ccf37be-1@test",
            "0cc175b9c0f1b6a831c399e269772661-1@test",
            "92eb5ffee6ae2fec3ad71c777531578f-1@test"
        ]
    );
}

#[tokio::test]
async fn test_missing_middle_volume_fails_the_video() {
    let movie = fake_mkv(9000, 15);
    let transport = Arc::new(FakeTransport::new());
    let files: Vec<NzbFile> = rar_set(&movie)
        .iter()
        .filter(|(name, _)| !name.contains("part2"))
        .map(|(name, data)| transport.post(name, data, 1024))
        .collect();
    let pipeline = pipeline(transport, test_config());

    let IngestOutcome::Failed { message } = run(&pipeline, files).await else {
        unreachable!("a spliced video is never indexed");
    };
    assert!(message.contains("movie.mkv"));
    assert_eq!(pipeline.store().node_count(), 1);
}

#[tokio::test]
async fn test_existence_check_rejects_missing_articles() {
    let transport = Arc::new(FakeTransport::new());
    let files = vec![transport.post("movie.mkv", &fake_mkv(5000, 13), 1000)];
    transport.remove("movie.mkv-3@test");
    let pipeline = pipeline(transport, test_config().with_existence_check(100));

    let IngestOutcome::Failed { message } = run(&pipeline, files).await else {
        unreachable!("missing articles fail the run");
    };
    assert!(message.contains("movie.mkv"));
    assert_eq!(pipeline.store().node_count(), 1);
}

#[tokio::test]
async fn test_slow_server_times_out_into_queue() {
    let transport = Arc::new(FakeTransport::new());
    let files = vec![transport.post("movie.mkv", &fake_mkv(2000, 14), 1000)];
    transport.set_latency(Duration::from_millis(200));
    let pipeline = pipeline(
        transport,
        test_config().with_ingest_timeout(Duration::from_millis(20)),
    );

    let IngestOutcome::Queued { reason, .. } = run(&pipeline, files).await else {
        unreachable!("timeouts are retried later");
    };
    assert!(reason.contains("timed out"));
    assert!(pipeline.history().all().is_empty());
}
