//! Passthrough processor talking to the host over its message port.
//!
//! Copies input channel 0 to both output channels, says hello every 1000
//! blocks and signs off once the host posts "stop".
//!
//! Run with `RUST_LOG=debug` to see the worker's control traffic.

use polyworklet::{
    AudioWorkletProcessor, BusLayout, GlobalScope, MessagePort, ModuleCatalog, ParameterValues, ProcessorDef,
    ProcessorOptions, WorkletHarness,
};
use serde_json::Value;

const HELLO_EVERY: u32 = 1000;

struct Passthrough {
    port: MessagePort,
    ticks: u32,
    resume: bool,
}

impl AudioWorkletProcessor for Passthrough {
    fn process(&mut self, inputs: &[Vec<&[f32]>], outputs: &mut [Vec<&mut [f32]>], _: &ParameterValues) -> bool {
        for msg in self.port.drain() {
            if msg == "stop" {
                self.resume = false;
            }
        }

        self.ticks += 1;
        if self.ticks == HELLO_EVERY {
            let _ = self.port.post_message("passthrough is alive.");
            self.ticks = 0;
        }

        let source = inputs.first().and_then(|port| port.first()).copied().unwrap_or(&[]);
        if let Some(channels) = outputs.first_mut() {
            for channel in channels.iter_mut() {
                for (o, i) in channel.iter_mut().zip(source) {
                    *o = *i;
                }
            }
        }
        if !self.resume {
            let _ = self.port.post_message("bye from passthrough.");
        }
        self.resume
    }

    fn port(&self) -> Option<&MessagePort> {
        Some(&self.port)
    }
}

struct PassthroughDef;

impl ProcessorDef for PassthroughDef {
    type Processor = Passthrough;

    fn construct(&self, mut options: ProcessorOptions) -> Passthrough {
        let port = match options.take_port() {
            Some(port) => port,
            None => polyworklet::message_channel(1).0,
        };
        Passthrough {
            port,
            ticks: 0,
            resume: true,
        }
    }
}

fn passthrough_module(scope: &mut GlobalScope<'_>) {
    scope.register_processor("passthrough", PassthroughDef);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let catalog = ModuleCatalog::new().module("passthrough.js", passthrough_module);
    let mut harness = WorkletHarness::new(catalog);
    for msg in harness.import("passthrough.js")? {
        println!("worker: {}", msg.to_json());
    }

    let layout = BusLayout::new(128, 2).input(1).output(2);
    let mut node = harness.create_node("passthrough", &layout, 48_000.0, Value::Null)?;
    println!("created {} for node {}", node.processor, node.node);

    let rendered = harness.render_offline(&node, 2500, |block, slot| {
        if let Some(input) = slot.input.channel(0, 0) {
            input.fill(if block % 2 == 0 { 0.5 } else { -0.5 });
        }
    })?;
    println!("rendered {} frames on {} channels", rendered[0].len(), rendered.len());

    node.port.post_message("stop")?;
    harness.process(&node, 0)?;
    for msg in node.port.drain() {
        println!("processor: {msg}");
    }

    for msg in harness.dispose(&node)? {
        println!("worker: {}", msg.to_json());
    }
    Ok(())
}
