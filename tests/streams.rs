use std::time::{Duration, Instant};

use framepipe::ingest::synthetic_index;
use framepipe::{select_providers, SourceSpec};

#[test]
fn video_list_advances_in_lock_step_until_all_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("videos.txt");
    std::fs::write(
        &list,
        "stub://a?frames=5&width=8&height=6\n\
         stub://b?frames=3&width=8&height=6\n\
         \n\
         stub://c?frames=7&width=8&height=6\n",
    )
    .unwrap();
    let spec = SourceSpec {
        videos_list: Some(list),
        videos_dir: Some(dir.path().to_path_buf()),
        batch_size: 1,
        ..SourceSpec::default()
    };
    let mut providers = select_providers(&spec).expect("providers");
    assert_eq!(providers.len(), 1);
    let provider = providers.remove(0);

    let mut sizes = Vec::new();
    for batch in provider {
        let batch = batch.expect("batch");
        let indices: Vec<u64> = batch
            .records
            .iter()
            .map(|record| synthetic_index(record.image().unwrap()).unwrap())
            .collect();
        assert!(indices.iter().all(|i| *i == indices[0]), "tick {:?}", indices);
        sizes.push(batch.len());
    }
    assert_eq!(sizes, vec![3, 3, 3, 2, 2, 1, 1]);
}

#[test]
fn video_glob_yields_batches_of_requested_size() {
    let spec = SourceSpec {
        video_path: Some("stub://clip?frames=5&width=16&height=12&fps=10".into()),
        batch_size: 2,
        width: Some(8),
        height: Some(6),
        ..SourceSpec::default()
    };
    let mut providers = select_providers(&spec).expect("providers");
    let provider = providers.remove(0);
    assert_eq!(provider.output_data().info().kind, "video");
    assert_eq!(provider.output_data().info().fps, Some(10.0));

    let batches: Vec<_> = provider.map(|batch| batch.expect("batch")).collect();
    let sizes: Vec<usize> = batches.iter().map(|batch| batch.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    let record = &batches[0].records[0];
    assert_eq!((record.width(), record.height()), (Some(8), Some(6)));
    assert_eq!(batches[2].records[0].frame_index, Some(4));
}

#[test]
fn live_stub_stream_delivers_frames_until_released() {
    let spec = SourceSpec {
        input: Some("stub://front?width=8&height=6&fps=100".into()),
        ..SourceSpec::default()
    };
    let mut providers = select_providers(&spec).expect("providers");
    let mut provider = providers.remove(0);
    assert_eq!(provider.output_data().info().kind, "rtsp");

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut frames = Vec::new();
    while frames.len() < 3 && Instant::now() < deadline {
        let batch = provider.next().expect("live stream open").expect("batch");
        for record in batch.records {
            frames.push(record.frame_index);
        }
    }
    provider.release();
    assert_eq!(frames, vec![Some(0), Some(1), Some(2)]);
    assert!(provider.next().is_none());
    assert_eq!(provider.output_data().info().width, Some(8));
}

#[test]
fn missing_image_directory_is_reported() {
    let spec = SourceSpec {
        images_dir: Some("/no/such/frames".into()),
        ..SourceSpec::default()
    };
    let err = select_providers(&spec).err().expect("missing dir");
    assert!(matches!(err, framepipe::PipelineError::MissingSource { .. }));
}
