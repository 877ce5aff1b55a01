use super::*;
use crate::config::FormatPreference;
use crate::extractor::discard_progress;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tempfile::TempDir;

/// What the scripted extractor does on one call
#[derive(Clone, Debug)]
enum Step {
    Produce(OutputKind, &'static str),
    Fail(ErrorKind),
    /// Cancel the token, then produce nothing usable
    CancelAndFail(ErrorKind),
}

struct ScriptedExtractor {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<ExtractionRequest>>,
    cancel: CancellationToken,
}

impl ScriptedExtractor {
    fn new(steps: Vec<Step>, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
            cancel,
        })
    }

    fn calls(&self) -> Vec<ExtractionRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, request: &ExtractionRequest, _progress: ProgressSink) -> ExtractionOutput {
        self.calls.lock().unwrap().push(request.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Fail(ErrorKind::ExtractorRejected));

        match step {
            Step::Produce(kind, ext) => {
                let path = request
                    .staging_dir
                    .join(format!("{}.{}", request.item_id, ext));
                tokio::fs::write(&path, b"media").await.unwrap();
                ExtractionOutput::produced(path, kind)
            }
            Step::Fail(kind) => ExtractionOutput::failed(kind, format!("scripted {kind}")),
            Step::CancelAndFail(kind) => {
                self.cancel.cancel();
                ExtractionOutput::failed(kind, "scripted failure after cancel")
            }
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct Fixture {
    _root: TempDir,
    temp_dir: PathBuf,
    folder: PathBuf,
    cancel: CancellationToken,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let temp_dir = root.path().join("temp");
        let folder = root.path().join("media");
        Self {
            temp_dir,
            folder,
            _root: root,
            cancel: CancellationToken::new(),
        }
    }

    fn settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            temp_dir: self.temp_dir.clone(),
            min_free_space: 0,
            attempt_timeout: Duration::from_secs(30),
            cookies_file: Some(PathBuf::from("/etc/cookies.txt")),
            backoff: BackoffPolicy {
                max_attempts: 6,
                base: Duration::ZERO,
                cap: Duration::ZERO,
                jitter: false,
            },
            ladder: ExtractorProfile::default_ladder(true),
        }
    }

    fn executor(&self, steps: Vec<Step>) -> (DownloadExecutor, Arc<ScriptedExtractor>) {
        let extractor = ScriptedExtractor::new(steps, self.cancel.clone());
        let executor = DownloadExecutor::new(extractor.clone(), self.settings());
        (executor, extractor)
    }

    fn staging_dirs_left(&self) -> usize {
        std::fs::read_dir(&self.temp_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

fn item() -> SourceItem {
    SourceItem {
        id: "vid001".into(),
        url: "https://www.youtube.com/watch?v=vid001".into(),
        title: Some("First Video".into()),
        channel: Some("Channel".into()),
        upload_date: Some("20250101".into()),
    }
}

fn video() -> DownloadOptions {
    DownloadOptions {
        final_format: Some("webm".into()),
        music_mode: false,
    }
}

#[tokio::test]
async fn test_native_muxed_output_is_accepted() {
    let fx = Fixture::new();
    let (executor, extractor) = fx.executor(vec![Step::Produce(OutputKind::MuxedVideo, "webm")]);

    let attempt = executor
        .execute(&item(), &fx.folder, &video(), &fx.cancel, discard_progress())
        .await;

    assert!(attempt.ok);
    assert_eq!(attempt.strategy, Strategy::Native);
    assert_eq!(attempt.retry_count, 0);
    assert_eq!(attempt.profile.as_deref(), Some("native"));
    let path = attempt.output_path.unwrap();
    assert_eq!(path, fx.folder.join("First Video - Channel (2025-01-01).webm"));
    assert!(path.exists());

    let calls = extractor.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].js_solver, "native attempt enables the solver");
    assert_eq!(calls[0].format, formats::PERMISSIVE_VIDEO);
    assert_eq!(fx.staging_dirs_left(), 0);
}

#[tokio::test]
async fn test_native_audio_only_output_enters_fallback() {
    let fx = Fixture::new();
    let (executor, extractor) = fx.executor(vec![
        Step::Produce(OutputKind::AudioOnly, "m4a"),
        Step::Produce(OutputKind::MuxedVideo, "webm"),
    ]);

    let attempt = executor
        .execute(&item(), &fx.folder, &video(), &fx.cancel, discard_progress())
        .await;

    assert!(attempt.ok);
    assert_eq!(attempt.strategy, Strategy::Fallback);
    assert_eq!(attempt.output_kind, OutputKind::MuxedVideo);
    assert_eq!(attempt.retry_count, 1);
    assert_eq!(attempt.profile.as_deref(), Some("android"));

    let calls = extractor.calls();
    assert_eq!(calls.len(), 2, "audio-only native output must not be final");
    assert!(!calls[1].js_solver);
    assert_eq!(calls[1].client.as_deref(), Some("android"));

    // Only the accepted muxed file reaches the folder
    let files: Vec<_> = std::fs::read_dir(&fx.folder).unwrap().collect();
    assert_eq!(files.len(), 1);
}

#[tokio::test]
async fn test_audio_only_is_rejected_on_every_fallback_step() {
    let fx = Fixture::new();
    let steps = std::iter::repeat_n(Step::Produce(OutputKind::AudioOnly, "m4a"), 10).collect();
    let (executor, extractor) = fx.executor(steps);

    let attempt = executor
        .execute(&item(), &fx.folder, &video(), &fx.cancel, discard_progress())
        .await;

    assert!(!attempt.ok);
    assert_eq!(attempt.error_kind, Some(ErrorKind::ExtractorRejected));
    assert_eq!(attempt.retry_count, 6);
    assert_eq!(extractor.calls().len(), 7);
    assert!(!fx.folder.join("First Video - Channel (2025-01-01).m4a").exists());
    assert_eq!(fx.staging_dirs_left(), 0);
}

#[tokio::test]
async fn test_music_mode_accepts_audio_only_native_output() {
    let fx = Fixture::new();
    let (executor, extractor) = fx.executor(vec![Step::Produce(OutputKind::AudioOnly, "mp3")]);
    let options = DownloadOptions {
        final_format: None,
        music_mode: true,
    };

    let attempt = executor
        .execute(&item(), &fx.folder, &options, &fx.cancel, discard_progress())
        .await;

    assert!(attempt.ok);
    assert_eq!(attempt.strategy, Strategy::Native);
    let calls = extractor.calls();
    assert_eq!(calls[0].format, formats::MUSIC);
    assert_eq!(calls[0].audio_format.as_deref(), Some("mp3"));
}

#[tokio::test]
async fn test_ladder_exhaustion_reports_last_network_failure() {
    let fx = Fixture::new();
    let steps = std::iter::repeat_n(Step::Fail(ErrorKind::Network), 10).collect();
    let (executor, extractor) = fx.executor(steps);

    let attempt = executor
        .execute(&item(), &fx.folder, &video(), &fx.cancel, discard_progress())
        .await;

    assert!(!attempt.ok);
    assert_eq!(attempt.strategy, Strategy::Fallback);
    assert_eq!(attempt.error_kind, Some(ErrorKind::Network));
    assert_eq!(attempt.retry_count, 6);

    let profiles: Vec<String> = extractor.calls().into_iter().map(|c| c.profile).collect();
    assert_eq!(
        profiles,
        vec![
            "native",
            "android",
            "tv_embedded",
            "web",
            "default",
            "default_permissive",
            "cookies_best"
        ]
    );
}

#[tokio::test]
async fn test_cookie_step_uses_cookie_file_and_best() {
    let fx = Fixture::new();
    let mut steps: Vec<Step> = std::iter::repeat_n(Step::Fail(ErrorKind::ExtractorRejected), 6).collect();
    steps.push(Step::Produce(OutputKind::MuxedVideo, "mp4"));
    let (executor, extractor) = fx.executor(steps);

    let attempt = executor
        .execute(&item(), &fx.folder, &video(), &fx.cancel, discard_progress())
        .await;

    assert!(attempt.ok);
    assert_eq!(attempt.profile.as_deref(), Some("cookies_best"));
    let last = extractor.calls().pop().unwrap();
    assert_eq!(last.format, formats::BEST);
    assert_eq!(last.cookies_file, Some(PathBuf::from("/etc/cookies.txt")));
}

#[tokio::test]
async fn test_unsupported_format_stops_the_ladder() {
    let fx = Fixture::new();
    let (executor, extractor) = fx.executor(vec![
        Step::Fail(ErrorKind::ExtractorRejected),
        Step::Fail(ErrorKind::Network),
        Step::Fail(ErrorKind::UnsupportedFormat),
        Step::Produce(OutputKind::MuxedVideo, "webm"),
    ]);

    let attempt = executor
        .execute(&item(), &fx.folder, &video(), &fx.cancel, discard_progress())
        .await;

    assert_eq!(attempt.error_kind, Some(ErrorKind::UnsupportedFormat));
    assert_eq!(attempt.retry_count, 2);
    assert_eq!(extractor.calls().len(), 3);
}

#[tokio::test]
async fn test_disk_failure_in_native_attempt_is_terminal() {
    let fx = Fixture::new();
    let (executor, extractor) = fx.executor(vec![Step::Fail(ErrorKind::Disk)]);

    let attempt = executor
        .execute(&item(), &fx.folder, &video(), &fx.cancel, discard_progress())
        .await;

    assert_eq!(attempt.error_kind, Some(ErrorKind::Disk));
    assert_eq!(extractor.calls().len(), 1);
}

#[tokio::test]
async fn test_insufficient_space_fails_before_extraction() {
    let fx = Fixture::new();
    let extractor = ScriptedExtractor::new(vec![], fx.cancel.clone());
    let mut settings = fx.settings();
    settings.min_free_space = u64::MAX;
    let executor = DownloadExecutor::new(extractor.clone(), settings);

    let attempt = executor
        .execute(&item(), &fx.folder, &video(), &fx.cancel, discard_progress())
        .await;

    assert_eq!(attempt.error_kind, Some(ErrorKind::Disk));
    assert!(attempt.message.unwrap().contains("Insufficient disk space"));
    assert!(extractor.calls().is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start_never_invokes_extractor() {
    let fx = Fixture::new();
    let (executor, extractor) = fx.executor(vec![]);
    fx.cancel.cancel();

    let attempt = executor
        .execute(&item(), &fx.folder, &video(), &fx.cancel, discard_progress())
        .await;

    assert_eq!(attempt.error_kind, Some(ErrorKind::Cancelled));
    assert!(extractor.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_between_phases_skips_fallback_and_cleans_up() {
    let fx = Fixture::new();
    let (executor, extractor) = fx.executor(vec![Step::CancelAndFail(ErrorKind::Network)]);

    let attempt = executor
        .execute(&item(), &fx.folder, &video(), &fx.cancel, discard_progress())
        .await;

    assert!(!attempt.ok);
    assert_eq!(attempt.error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(extractor.calls().len(), 1);
    assert_eq!(fx.staging_dirs_left(), 0);
}

#[tokio::test]
async fn test_cancel_between_ladder_steps() {
    let fx = Fixture::new();
    let (executor, extractor) = fx.executor(vec![
        Step::Fail(ErrorKind::Network),
        Step::Fail(ErrorKind::Network),
        Step::CancelAndFail(ErrorKind::Network),
        Step::Produce(OutputKind::MuxedVideo, "webm"),
    ]);

    let attempt = executor
        .execute(&item(), &fx.folder, &video(), &fx.cancel, discard_progress())
        .await;

    assert_eq!(attempt.error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(attempt.retry_count, 2);
    assert_eq!(extractor.calls().len(), 3);
}

#[tokio::test]
async fn test_name_collision_gets_numbered_suffix() {
    let fx = Fixture::new();
    std::fs::create_dir_all(&fx.folder).unwrap();
    std::fs::write(fx.folder.join("First Video - Channel (2025-01-01).webm"), b"old").unwrap();
    let (executor, _) = fx.executor(vec![Step::Produce(OutputKind::MuxedVideo, "webm")]);

    let attempt = executor
        .execute(&item(), &fx.folder, &video(), &fx.cancel, discard_progress())
        .await;

    assert_eq!(
        attempt.output_path.unwrap(),
        fx.folder.join("First Video - Channel (2025-01-01) (1).webm")
    );
}

#[tokio::test]
async fn test_custom_ladder_and_attempt_bound() {
    let fx = Fixture::new();
    let extractor = ScriptedExtractor::new(
        std::iter::repeat_n(Step::Fail(ErrorKind::Network), 10).collect(),
        fx.cancel.clone(),
    );
    let mut settings = fx.settings();
    settings.backoff.max_attempts = 2;
    settings.ladder = vec![
        ExtractorProfile {
            name: "ios".into(),
            client: Some("ios".into()),
            headers: Default::default(),
            format: FormatPreference::Permissive,
            use_cookies: false,
        },
        ExtractorProfile {
            name: "mweb".into(),
            client: Some("mweb".into()),
            headers: Default::default(),
            format: FormatPreference::Strict,
            use_cookies: false,
        },
        ExtractorProfile {
            name: "never".into(),
            client: None,
            headers: Default::default(),
            format: FormatPreference::Best,
            use_cookies: false,
        },
    ];
    let executor = DownloadExecutor::new(extractor.clone(), settings);

    let attempt = executor
        .execute(&item(), &fx.folder, &video(), &fx.cancel, discard_progress())
        .await;

    assert_eq!(attempt.retry_count, 2);
    let profiles: Vec<String> = extractor.calls().into_iter().map(|c| c.profile).collect();
    assert_eq!(profiles, vec!["native", "ios", "mweb"]);
}
