//! Ember Engine Runtime
//!
//! Minimal binary that boots the GPU resource lifecycle and drives it
//! through a synthetic frame loop: no device and no window, just the full
//! acquire/update/release protocol against stand-in fences.

use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use ember_gpu::{
    BindingUpdate, FenceProvider, InstanceResources, ResourceLifecycle, ResourceTag,
};
use ember_metrics::FrameTimer;
use ember_services::Settings;
use std::ptr::NonNull;
use std::time::{Duration, Instant};

/// Stand-in fence source. Every slot reports signaled immediately, the
/// behavior of a backend whose submissions retire before the next frame
/// begins. Real backends hand their queue fences in here.
struct ImmediateFences;

impl FenceProvider for ImmediateFences {
    fn wait(&mut self, _frame_index: usize, _timeout: Duration) -> bool {
        true
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MaterialUniform {
    tint: [f32; 4],
    roughness: f32,
    _pad: [f32; 3],
}

struct Material {
    name: &'static str,
    resources: InstanceResources,
    staging: NonNull<u8>,
    tag: ResourceTag,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Ember Engine v{}", ember_gpu::VERSION);
    let settings = Settings::load_or_default("ember.settings.json");
    let mut lifecycle = ResourceLifecycle::new(settings.lifecycle_config());
    let mut fences = ImmediateFences;
    let mut timer = FrameTimer::new(120);

    let uniform_size = std::mem::size_of::<MaterialUniform>() as u64;
    let mut materials = Vec::new();
    for (index, name) in ["bricks", "steel", "glass"].into_iter().enumerate() {
        let resources = lifecycle
            .create_instance(uniform_size)
            .ok_or_else(|| anyhow::anyhow!("instance pool exhausted for {name}"))?;
        let staging = lifecycle
            .allocate(uniform_size)
            .ok_or_else(|| anyhow::anyhow!("staging arena exhausted for {name}"))?;
        materials.push(Material {
            name,
            resources,
            staging,
            tag: ResourceTag::new(index as u32),
        });
    }
    tracing::info!(
        count = materials.len(),
        arena_space_left = lifecycle.arena_space_left(),
        uniform_space_left = lifecycle.uniform_space_left(),
        "materials created"
    );

    for frame in 0..240u64 {
        timer.begin();
        let wait_start = Instant::now();
        let frame_slot = lifecycle.begin_frame(&mut fences)?;
        timer.record_fence_wait(wait_start.elapsed());

        // Replacing a material's data only bumps its tag; stale bindings
        // rewrite themselves as each frame slot comes around.
        if frame == 90 {
            materials[1].tag.bump_generation();
            tracing::info!(material = materials[1].name, "texture swapped");
        }

        if frame == 150 {
            let retired = materials.pop().expect("materials not empty");
            lifecycle.release(retired.staging, uniform_size)?;
            lifecycle.destroy_instance(retired.resources);
            tracing::info!(material = retired.name, "queued for destruction");
        }

        for material in &mut materials {
            let update = lifecycle.prepare_instance(material.resources.slot, material.tag);
            if update == BindingUpdate::Rewrite {
                let uniform = MaterialUniform {
                    tint: [0.2, 0.4, 0.8, 1.0],
                    roughness: material.tag.generation as f32 * 0.1,
                    _pad: [0.0; 3],
                };
                lifecycle.write(material.staging, &uniform)?;
                tracing::debug!(material = material.name, frame_slot, "descriptor rewritten");
            }
        }

        lifecycle.end_frame();
        timer.end();
    }

    // Tear down: everything goes through the same deferred path, then a few
    // idle frames let the retire queue drain.
    for material in materials.drain(..) {
        lifecycle.release(material.staging, uniform_size)?;
        lifecycle.destroy_instance(material.resources);
    }
    while lifecycle.pending_retires() > 0 {
        lifecycle.begin_frame(&mut fences)?;
        lifecycle.end_frame();
    }

    let counters = *lifecycle.counters();
    ember_metrics::metrics! {
        tracing::info!(
            fps = timer.fps(),
            frame_time_ms = timer.frame_time_ms(),
            fence_wait_ms = timer.fence_wait_ms(),
            rebinds = counters.rebinds(),
            cached_binds = counters.cached_binds(),
            "frame loop finished"
        );
    }
    tracing::info!(
        live_instances = lifecycle.live_instances(),
        arena_space_left = lifecycle.arena_space_left(),
        uniform_space_left = lifecycle.uniform_space_left(),
        outstanding_releases = counters.outstanding_releases(),
        "runtime shut down clean"
    );

    Ok(())
}
