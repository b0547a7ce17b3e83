use nodeflow::{ChannelEvent, ChannelOptions, Config, EngineBuilder, WorkflowModel};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let config = Config::load_from_str(include_str!("./config.toml")).unwrap();
    let engine = EngineBuilder::new().config(config).build().unwrap();

    engine.launch();

    let workflow_model = WorkflowModel::from_json(include_str!("./workflow.json")).unwrap();
    let report = engine.validate(&workflow_model);
    if !report.is_valid() {
        println!("Invalid workflow: {:#?}", report.errors);
        return;
    }
    engine.deploy(&workflow_model).unwrap();

    let events = ChannelEvent::channel(engine.channel(), ChannelOptions::default()).unwrap();
    events.on_result(|eid, result| {
        println!("[{}] {} -> {:?}", eid, result.node_id, result.status);
    });
    events.on_log(|log| {
        println!("[{}] {}: {}", log.eid, log.nid, log.content);
    });

    let execution = engine.run(&workflow_model.id, json!({ "users": [{ "name": "ada" }, { "name": "grace" }, { "name": "linus" }] })).unwrap();

    println!("Status: {:?}", execution.status);
    if let Some(result) = execution.last_result("users") {
        println!("Outputs: {:#}", result.output);
    }

    engine.shutdown();
}
