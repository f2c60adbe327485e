use std::path::PathBuf;

use anyhow::Context;
use bytemuck::{Pod, Zeroable};

use seacrest_engine::core::{App, AppControl, FrameCtx};
use seacrest_engine::device::{
    ClearColor, Format, GraphicsContext, Pipeline, PipelineDesc, PrimitiveTopology, RootSignature,
    RootSignatureDesc, ShaderSource, ShaderVisibility, VertexAttribute, VertexBufferView, VertexFormat,
};
use seacrest_engine::input::Key;
use seacrest_engine::logging::CLIENT_TARGET;

const CLEAR: u32 = 0x161616;

/// Horizontal speed of the triangle in clip-space units per second.
const OFFSET_SPEED: f32 = 0.3;
const OFFSET_BOUND: f32 = 1.25;

const TITLE_INTERVAL: f64 = 0.5;

const SHADER: &str = r#"
cbuffer SceneConstants : register(b0)
{
    float4 offset;
};

struct PSInput
{
    float4 position : SV_POSITION;
    float4 color : COLOR;
};

PSInput VSMain(float4 position : POSITION, float4 color : COLOR)
{
    PSInput result;
    result.position = position + offset;
    result.color = color;
    return result;
}

float4 PSMain(PSInput input) : SV_TARGET
{
    return input.color;
}
"#;

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct Vertex {
    position: [f32; 3],
    color: [f32; 4],
}

/// Startup switches for the sandbox.
#[derive(Debug, Clone, Default)]
pub struct SandboxOptions {
    pub animate: bool,
    pub cycle_clear: bool,
    /// Directory for screenshots taken with F12.
    pub screenshot_dir: PathBuf,
    /// Frame index and path of a screenshot taken without user input.
    pub final_screenshot: Option<(u64, PathBuf)>,
}

struct Scene {
    root_signature: RootSignature,
    pipeline: Pipeline,
    vertices: VertexBufferView,
}

/// Draws one colored triangle over a dark clear.
///
/// Space toggles the horizontal movement, C toggles the clear color cycle,
/// F12 saves a screenshot and Escape quits.
pub struct SandboxApp {
    options: SandboxOptions,
    scene: Option<Scene>,
    clear: ClearColor,
    offset: f32,
    screenshots: u32,
    last_title: f64,
}

impl SandboxApp {
    pub fn new(options: SandboxOptions) -> Self {
        Self {
            options,
            scene: None,
            clear: ClearColor::rgb_hex(CLEAR),
            offset: 0.0,
            screenshots: 0,
            last_title: f64::NEG_INFINITY,
        }
    }

    fn handle_keys(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl {
        let pressed = &ctx.input_frame.keys_pressed;

        if pressed.contains(&Key::Escape) {
            log::info!(target: CLIENT_TARGET, "escape pressed, exiting");
            return AppControl::Exit;
        }
        if pressed.contains(&Key::Space) {
            self.options.animate = !self.options.animate;
            log::info!(target: CLIENT_TARGET, "triangle movement: {}", on_off(self.options.animate));
        }
        if pressed.contains(&Key::C) {
            self.options.cycle_clear = !self.options.cycle_clear;
            if !self.options.cycle_clear {
                self.clear = ClearColor::rgb_hex(CLEAR);
            }
            log::info!(target: CLIENT_TARGET, "clear color cycle: {}", on_off(self.options.cycle_clear));
        }
        if pressed.contains(&Key::F12) {
            self.screenshots += 1;
            let path = self
                .options
                .screenshot_dir
                .join(format!("seacrest_{:04}.png", self.screenshots));
            log::info!(target: CLIENT_TARGET, "screenshots taken: {}", self.screenshots);
            ctx.gpu.request_screenshot(path);
        }
        AppControl::Continue
    }

    fn update_title(&mut self, ctx: &mut FrameCtx<'_>) {
        if ctx.window.is_none() || ctx.lifetime - self.last_title < TITLE_INTERVAL {
            return;
        }
        self.last_title = ctx.lifetime;

        let pointer = match ctx.input.pointer_pos {
            Some((x, y)) => format!("{x:.0}, {y:.0}"),
            None => "-".to_string(),
        };
        ctx.runtime.set_title(format!(
            "Seacrest Engine Sandbox | {:.2}s | mouse {pointer}",
            ctx.lifetime
        ));
    }
}

impl App for SandboxApp {
    fn on_start(&mut self, gpu: &mut GraphicsContext) -> anyhow::Result<()> {
        let (width, height) = gpu.size();
        let aspect = width as f32 / height as f32;

        let root_signature = gpu
            .create_root_signature(
                RootSignatureDesc::new()
                    .allow_input_layout()
                    .constant_buffer(0, ShaderVisibility::Vertex),
            )
            .context("failed to create root signature")?;

        let stage = |entry_point, target| ShaderSource {
            source: SHADER.into(),
            entry_point,
            target,
        };
        let pipeline = gpu
            .create_pipeline(
                &root_signature,
                &PipelineDesc {
                    label: "sandbox triangle",
                    root_signature: root_signature.id(),
                    vertex: stage("VSMain", "vs_5_0"),
                    pixel: stage("PSMain", "ps_5_0"),
                    vertex_layout: vec![
                        VertexAttribute {
                            semantic: "POSITION",
                            format: VertexFormat::Float32x3,
                            offset: 0,
                        },
                        VertexAttribute {
                            semantic: "COLOR",
                            format: VertexFormat::Float32x4,
                            offset: 12,
                        },
                    ],
                    render_target_format: Format::Rgba8Unorm,
                    topology: PrimitiveTopology::TriangleList,
                },
            )
            .context("failed to create pipeline")?;

        let vertices = gpu
            .create_vertex_buffer("sandbox triangle", &triangle(aspect))
            .context("failed to create vertex buffer")?;

        log::info!(target: CLIENT_TARGET, "sandbox ready on {} backend", gpu.backend_name());
        self.scene = Some(Scene {
            root_signature,
            pipeline,
            vertices,
        });
        Ok(())
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl {
        if self.handle_keys(ctx) == AppControl::Exit {
            return AppControl::Exit;
        }

        if let Some((frame, path)) = &self.options.final_screenshot {
            if ctx.time.frame_index == *frame {
                ctx.gpu.request_screenshot(path.clone());
            }
        }

        if self.options.animate {
            self.offset = advance_offset(self.offset, ctx.time.dt);
        }
        if self.options.cycle_clear {
            self.clear.g = cycled_green(ctx.lifetime);
        }

        let Some(scene) = &self.scene else {
            log::error!(target: CLIENT_TARGET, "frame requested before start");
            return AppControl::Exit;
        };

        let offset = [self.offset, 0.0f32, 0.0, 0.0];
        let control = ctx.render(self.clear, |enc, heap| {
            enc.set_descriptor_heaps(&[heap])?;
            enc.set_root_signature(&scene.root_signature);
            enc.set_pipeline(&scene.pipeline);
            let constants = enc.upload(&offset)?;
            enc.set_root_constant_buffer(0, constants.address)?;
            enc.set_vertex_buffer(scene.vertices)?;
            enc.draw(3, 1)
        });

        self.update_title(ctx);
        control
    }

    fn on_shutdown(&mut self, gpu: &mut GraphicsContext) {
        if let Some(scene) = self.scene.take() {
            if let Err(e) = gpu.release_buffer(scene.vertices.buffer) {
                log::warn!(target: CLIENT_TARGET, "failed to release triangle: {e}");
            }
        }
        log::info!(target: CLIENT_TARGET, "sandbox shut down after {} frames", gpu.frame_number());
    }
}

fn triangle(aspect: f32) -> [Vertex; 3] {
    let h = 0.25 * aspect;
    [
        Vertex {
            position: [0.0, h, 0.0],
            color: [1.0, 0.0, 0.0, 1.0],
        },
        Vertex {
            position: [0.25, -h, 0.0],
            color: [0.0, 1.0, 0.0, 1.0],
        },
        Vertex {
            position: [-0.25, -h, 0.0],
            color: [0.0, 0.0, 1.0, 1.0],
        },
    ]
}

/// Moves the triangle right, re-entering from the left edge.
fn advance_offset(offset: f32, dt: f32) -> f32 {
    let next = offset + OFFSET_SPEED * dt;
    if next > OFFSET_BOUND { -OFFSET_BOUND } else { next }
}

fn cycled_green(seconds: f64) -> f32 {
    (seconds.sin() / 2.0 + 0.5) as f32
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seacrest_engine::device::{GpuInit, HeadlessConfig};
    use seacrest_engine::window::{Runtime, RuntimeConfig};
    use winit::dpi::LogicalSize;

    #[test]
    fn offset_wraps_to_the_left_edge() {
        assert_eq!(advance_offset(1.2, 1.0), -OFFSET_BOUND);
        assert!((advance_offset(0.0, 0.5) - 0.15).abs() < 1e-6);
    }

    #[test]
    fn green_cycles_within_unit_range() {
        assert!((cycled_green(0.0) - 0.5).abs() < 1e-6);
        for step in 0..100 {
            let g = cycled_green(step as f64 * 0.1);
            assert!((0.0..=1.0).contains(&g));
        }
    }

    #[test]
    fn headless_run_renders_and_captures_the_last_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final.png");
        let app = SandboxApp::new(SandboxOptions {
            animate: true,
            cycle_clear: true,
            screenshot_dir: dir.path().to_path_buf(),
            final_screenshot: Some((3, path.clone())),
        });
        let config = RuntimeConfig {
            initial_size: LogicalSize::new(32.0, 16.0),
            ..RuntimeConfig::default()
        };

        let frames = Runtime::run_headless(config, GpuInit::headless(HeadlessConfig::default()), 4, app).unwrap();

        assert_eq!(frames, 4);
        assert!(path.exists());
    }
}
