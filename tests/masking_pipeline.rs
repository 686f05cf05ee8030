//! End-to-end masking runs through the stage pipeline

use std::sync::Arc;

use seqmask::core::{FlowEndpoint4Tuple, TcpFlags, TcpSegment};
use seqmask::flow::StreamId;
use seqmask::mask::MaskTableExport;
use seqmask::pipeline::{CollectingEventSink, RewriteStage, RuleLoadStage, EXPORT_ARTIFACT};
use seqmask::{Config, MaskError, Pipeline, RunContext, RunState, Stage};

const RULES: &str = r#"{
    "rules": [
        {
            "stream": "10.0.0.1:443-10.0.0.2:50000:fwd",
            "seq_start": 1000, "seq_end": 1500,
            "mask_type": "tls_application_data",
            "spec": {"type": "mask_after", "keep_bytes": 5}
        },
        {
            "stream": "10.0.0.1:443-10.0.0.2:50000:fwd",
            "seq_start": 1500, "seq_end": 1600,
            "mask_type": "tls_application_data",
            "spec": {"type": "mask_after", "keep_bytes": 5}
        },
        {
            "tuple": {"src_ip": "10.0.0.2", "src_port": 50000, "dst_ip": "10.0.0.1", "dst_port": 443},
            "seq_start": 5000, "seq_end": 5100,
            "mask_type": "tls_application_data",
            "spec": {"type": "mask_range", "ranges": [[0, 5], [10, 20]]},
            "preserve_headers": [[0, 2]]
        }
    ]
}"#;

fn server() -> FlowEndpoint4Tuple {
    FlowEndpoint4Tuple::parse("10.0.0.1", 443, "10.0.0.2", 50000).unwrap()
}

fn client() -> FlowEndpoint4Tuple {
    server().swapped()
}

fn segments() -> Vec<TcpSegment> {
    let syn_ack = TcpFlags {
        syn: true,
        ack: true,
        ..Default::default()
    };
    vec![
        TcpSegment::new(1, server(), 999, Vec::new()).with_flags(syn_ack),
        TcpSegment::new(2, server(), 1100, vec![0xAA; 50]),
        TcpSegment::new(3, server(), 1490, vec![0xBB; 50]),
        TcpSegment::new(4, client(), 5000, vec![0xCC; 30]),
        TcpSegment::new(5, server(), 9000, vec![0xDD; 10]),
    ]
}

fn context(dir: &std::path::Path) -> RunContext {
    let rules = dir.join("rules.json");
    std::fs::write(&rules, RULES).unwrap();

    let mut config = Config::default();
    config.pipeline.scratch_root = Some(dir.to_path_buf());
    config.export.enabled = true;
    RunContext::new(config)
        .with_input(rules)
        .with_output_dir(dir)
        .with_segments(segments())
}

#[test]
fn masks_each_stream_by_its_own_intervals() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(dir.path());
    let sink = Arc::new(CollectingEventSink::new());
    let mut pipeline = Pipeline::masking().with_event_sink(sink.clone());

    let report = pipeline.run(&mut ctx).unwrap();
    assert_eq!(report.state, RunState::Success);
    assert_eq!(sink.started_stages(), vec!["classify", "rewrite", "export"]);

    // Fully inside [1000,1600): first 5 bytes kept
    let p = &ctx.segments[1].payload;
    assert_eq!(&p[..5], &[0xAA; 5]);
    assert!(p[5..].iter().all(|&b| b == 0));

    // Adjacent MaskAfter(5) entries merged into [1000,1600): one match
    let p = &ctx.segments[2].payload;
    assert_eq!(&p[..5], &[0xBB; 5]);
    assert!(p[5..].iter().all(|&b| b == 0));

    // Reverse stream: ranges zeroed, preserved header bytes restored
    let p = &ctx.segments[3].payload;
    assert_eq!(&p[..2], &[0xCC; 2]);
    assert!(p[2..5].iter().all(|&b| b == 0));
    assert!(p[5..10].iter().all(|&b| b == 0xCC));
    assert!(p[10..20].iter().all(|&b| b == 0));
    assert!(p[20..].iter().all(|&b| b == 0xCC));

    // Outside every interval
    assert!(ctx.segments[4].payload.iter().all(|&b| b == 0xDD));

    let table = ctx.mask_table.as_ref().unwrap();
    assert_eq!(table.stats().entries_merged, 1);
    assert_eq!(
        ctx.flows.get(&StreamId::for_sender(server())).unwrap().initial_seq(),
        Some(999)
    );

    let stats = ctx.rewrite_stats.as_ref().unwrap();
    assert_eq!(stats.segments_seen, 5);
    assert_eq!(stats.payload_segments, 4);
    assert_eq!(stats.matched_segments, 3);
    assert_eq!(stats.bytes_preserved, 2);

    let export_path = &ctx.artifacts[EXPORT_ARTIFACT];
    assert_eq!(export_path, &dir.path().join("mask_table.json"));
    let export: MaskTableExport =
        serde_json::from_str(&std::fs::read_to_string(export_path).unwrap()).unwrap();
    assert!(export.finalized);
    assert_eq!(export.streams.len(), 2);
    assert_eq!(
        export.streams["10.0.0.1:443-10.0.0.2:50000:fwd"][0].seq_end,
        1600
    );
}

#[test]
fn missing_rules_fail_the_first_stage() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(dir.path()).with_input(dir.path().join("absent.json"));
    let original = ctx.segments.clone();
    let mut pipeline = Pipeline::masking();

    let err = pipeline.run(&mut ctx).unwrap_err();
    assert_eq!(err.failed_stage(), Some(("classify", 0)));
    assert_eq!(pipeline.state(), RunState::Failed);
    assert_eq!(ctx.segments, original);
    assert!(ctx.rewrite_stats.is_none());
    assert!(ctx.artifacts.is_empty());
}

struct FailingStage;

impl Stage for FailingStage {
    fn name(&self) -> &str {
        "failing"
    }

    fn execute(&mut self, ctx: &mut RunContext) -> anyhow::Result<()> {
        let path = ctx.temp_file("partial")?;
        std::fs::write(&path, b"partial output")?;
        anyhow::bail!("disk full")
    }
}

#[test]
fn failure_after_rewrite_releases_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let mut ctx = context(dir.path());
    ctx.config.pipeline.scratch_root = Some(scratch.path().to_path_buf());

    let mut pipeline = Pipeline::new()
        .with_stage(RuleLoadStage::new())
        .with_stage(RewriteStage::new())
        .with_stage(FailingStage);

    let err = pipeline.run(&mut ctx).unwrap_err();
    assert!(matches!(err, MaskError::Stage { index: 2, .. }));
    assert!(err.to_string().contains("disk full"));

    // Earlier stages' effects remain
    assert!(ctx.rewrite_stats.is_some());
    assert!(ctx.live_temp_paths().is_empty());
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn rules_can_be_added_before_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(dir.path());
    ctx.input_path = None;
    ctx.config.export.enabled = false;

    let mut table = seqmask::MaskTable::new();
    table
        .add_mask_range(
            StreamId::for_sender(client()),
            5000,
            5030,
            "opaque",
            seqmask::MaskSpec::mask_after(0),
        )
        .unwrap();
    ctx.mask_table = Some(table);

    Pipeline::masking().run(&mut ctx).unwrap();
    assert!(ctx.segments[3].payload.iter().all(|&b| b == 0));
    assert!(ctx.segments[1].payload.iter().all(|&b| b == 0xAA));
    assert!(ctx.artifacts.is_empty());
}
