//! Integration test: dump configuration -> engine wiring
//!
//! Loads a vkrd.toml dump table the way the replay entry point does and
//! verifies the engine builds the configured interception state from it.
//! No device is created; everything here is host-side bookkeeping.
//!
//! Run with: cargo test --test dump_options_test -- --nocapture

use std::sync::Arc;

use parking_lot::Mutex;
use vkrd_core::ReplayOptions;
use vkrd_engine::{DelegateEvent, DumpEngine, RecordingDelegate};

const CONFIG: &str = r#"
async_pipeline_creation = true
pipeline_creation_jobs = 2

[[shader_replacements]]
shader_id = 77
path = "shaders/fixed.spv"

[dump]
queue_submit_indices = [900]
dump_before = false
json_per_command = true

[[dump.command_buffers]]
begin_index = 100
draw_indices = [105, 112]
render_pass_indices = [[103, 120]]

[[dump.command_buffers]]
begin_index = 200
dispatch_indices = [204]
trace_rays_indices = [208]

[[dump.command_buffers]]
begin_index = 300
draw_indices = [302]
executed_by = 100
"#;

static LOG: std::sync::Once = std::sync::Once::new();

fn load_config() -> ReplayOptions {
    LOG.call_once(vkrd_common::init_logging);
    let path = std::env::temp_dir().join(format!("vkrd-test-{}.toml", std::process::id()));
    std::fs::write(&path, CONFIG).unwrap();
    let options = ReplayOptions::load(path.to_str().unwrap()).unwrap();
    let _ = std::fs::remove_file(&path);
    options
}

#[test]
fn toml_dump_table_builds_engine_contexts() {
    let options = load_config();
    assert!(options.is_dump_enabled());
    assert!(options.async_pipeline_creation);
    assert_eq!(options.pipeline_creation_jobs, 2);
    assert_eq!(options.shader_replacement_for(77), Some("shaders/fixed.spv"));
    assert_eq!(options.shader_replacement_for(78), None);

    let delegate = Arc::new(Mutex::new(RecordingDelegate::new()));
    let engine = DumpEngine::new(&options.dump, Box::new(Arc::clone(&delegate)));

    // one draw context per draw entry, one dispatch context for the
    // compute entry, plus the secondary's own draw context
    assert!(engine.draw_context(100).is_some());
    assert!(engine.dispatch_context(200).is_some());
    assert!(engine.draw_context(300).is_some());
    assert_eq!(engine.context_count(), 3);

    assert!(engine.intercepts_begin(100));
    assert!(engine.intercepts_begin(200));
    assert!(!engine.intercepts_begin(105));
    assert!(engine.must_dump_submit(900, &[]));
    assert!(!engine.must_dump_submit(901, &[]));
}

#[test]
fn secondary_entry_grows_primary_clone_budget() {
    let options = load_config();
    let delegate = Arc::new(Mutex::new(RecordingDelegate::new()));
    let engine = DumpEngine::new(&options.dump, Box::new(Arc::clone(&delegate)));

    let primary = engine.draw_context(100).unwrap();
    assert_eq!(primary.secondaries, vec![300]);
    // two own draws + one spliced secondary draw + the trailing clone
    assert_eq!(primary.required_clones(), 4);

    let dispatch = engine.dispatch_context(200).unwrap();
    // dispatch and trace-rays indices merge into one guarded set
    assert_eq!(dispatch.required_clones(), 3);
}

#[test]
fn guarded_lookup_follows_configuration() {
    let options = load_config();
    let delegate = Arc::new(Mutex::new(RecordingDelegate::new()));
    let engine = DumpEngine::new(&options.dump, Box::new(Arc::clone(&delegate)));

    let primary = engine.draw_context(100).unwrap();
    assert!(primary.is_guarded(105));
    assert!(primary.is_guarded(112));
    assert!(!primary.is_guarded(103));

    // a dump point strictly inside the render pass group forces the
    // store/load variant path
    assert!(primary.render_pass_needs_manual_handling(103));
}

#[test]
fn engine_lifetime_brackets_delegate() {
    let options = load_config();
    let delegate = Arc::new(Mutex::new(RecordingDelegate::new()));
    let mut engine = DumpEngine::new(&options.dump, Box::new(Arc::clone(&delegate)));
    assert_eq!(delegate.lock().events, vec![DelegateEvent::Open]);

    engine.release_all(None);
    engine.release_all(None);
    let events = delegate.lock().events.clone();
    assert_eq!(events, vec![DelegateEvent::Open, DelegateEvent::Close]);
    assert!(engine.draw_context(100).unwrap().is_released());
    assert!(engine.dispatch_context(200).unwrap().is_released());
}
