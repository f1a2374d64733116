//! Render a gain processor offline and bounce the result to a WAV file.
//!
//! Usage: `cargo run --example offline_bounce -- [out.wav]`

use polyworklet::{
    write_wav, AudioWorkletProcessor, BusLayout, GlobalScope, MessagePort, ModuleCatalog, ParameterDescriptor,
    ParameterValues, ProcessorDef, ProcessorOptions, WorkletHarness,
};
use serde_json::json;

const SAMPLE_RATE: u32 = 48_000;
const BLOCK: usize = 128;

struct Gain {
    port: MessagePort,
    gain: f32,
}

impl AudioWorkletProcessor for Gain {
    fn process(&mut self, inputs: &[Vec<&[f32]>], outputs: &mut [Vec<&mut [f32]>], params: &ParameterValues) -> bool {
        let gain = self.gain * params.get("gain").unwrap_or(1.0);
        for (out, input) in outputs[0].iter_mut().zip(&inputs[0]) {
            for (o, i) in out.iter_mut().zip(input.iter()) {
                *o = i * gain;
            }
        }
        true
    }

    fn port(&self) -> Option<&MessagePort> {
        Some(&self.port)
    }
}

struct GainDef;

impl ProcessorDef for GainDef {
    type Processor = Gain;

    fn parameter_descriptors(&self) -> Vec<ParameterDescriptor> {
        vec![ParameterDescriptor::new("gain").default_value(0.5).range(0.0, 1.0)]
    }

    fn construct(&self, mut options: ProcessorOptions) -> Gain {
        let gain = options.processor_options["gain"].as_f64().unwrap_or(1.0) as f32;
        let port = match options.take_port() {
            Some(port) => port,
            None => polyworklet::message_channel(1).0,
        };
        Gain { port, gain }
    }
}

fn utils_module(scope: &mut GlobalScope<'_>) {
    scope.register_processor("gain", GainDef);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let out = std::env::args().nth(1).unwrap_or_else(|| "offline_bounce.wav".to_string());

    let mut harness = WorkletHarness::new(ModuleCatalog::new().module("utils", utils_module));
    harness.import("utils")?;

    let layout = BusLayout::new(BLOCK, 2).input(2).output(2);
    let node = harness.create_node("gain", &layout, SAMPLE_RATE as f32, json!({ "gain": 0.8 }))?;

    // One second of a 440 Hz sine, quarter cycle out of phase on the right.
    let blocks = SAMPLE_RATE as usize / BLOCK;
    let rendered = harness.render_offline(&node, blocks, |block, slot| {
        for channel in 0..2 {
            let Some(view) = slot.input.channel(0, channel) else { continue };
            let phase = channel as f32 * std::f32::consts::FRAC_PI_2;
            let samples: Vec<f32> = (0..BLOCK)
                .map(|i| {
                    let t = (block * BLOCK + i) as f32 / SAMPLE_RATE as f32;
                    (2.0 * std::f32::consts::PI * 440.0 * t + phase).sin()
                })
                .collect();
            view.write(&samples);
        }
    })?;

    write_wav(&out, &rendered, SAMPLE_RATE)?;
    println!("wrote {} frames to {out}", rendered[0].len());
    Ok(())
}
