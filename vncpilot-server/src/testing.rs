//! Engine fixtures for unit tests.

use vncpilot_core::{
    ButtonMask, Engine, EngineConfig, EngineHandle, FfmpegFactory, Generation, Link, Point, Rect,
    wire_channel,
};

/// A link whose connections never progress.
pub struct IdleLink;

impl Link for IdleLink {
    fn open(&mut self, _: Generation, _: &str, _: u16, _: Option<&str>) {}
    fn close(&mut self) {}
    fn request_update(&mut self, _: bool, _: Rect) {}
    fn pointer(&mut self, _: ButtonMask, _: Point) {}
    fn key(&mut self, _: u32, _: bool) {}
}

/// A running engine with no reachable desktop.
pub fn idle_engine() -> EngineHandle {
    let (_tx, rx) = wire_channel();
    let (engine, handle) = Engine::new(
        EngineConfig::default(),
        Box::new(IdleLink),
        rx,
        Box::new(FfmpegFactory::default()),
    )
    .unwrap();
    engine.spawn();
    handle
}
