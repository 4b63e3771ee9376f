//! Compute Kernel Binding
//!
//! [`Algorithm`] ties an opaque SPIR-V kernel to a fixed list of memory
//! resources and a dispatch triple. Construction builds the whole static
//! pipeline state up front — descriptor set layout, pool and set, pipeline
//! layout with an optional push-constant range, and the compute pipeline —
//! so recording a dispatch later is just bind + push + dispatch.
//!
//! The resource list is positional: binding `n` in the kernel is the `n`-th
//! resource passed at construction. Descriptor writes are built from each
//! resource's own payload, which is also where an image's cached view gets
//! created on first use.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::device::DeviceContext;
use crate::errors::{BasaltError, Result};
use crate::memory::{DescriptorWrite, Memory};

/// A compute kernel bound to its resources, ready to record dispatches.
pub struct Algorithm {
    ctx: Arc<DeviceContext>,
    id: Uuid,
    resources: Vec<Arc<dyn Memory>>,
    workgroup: [u32; 3],
    push_constant_size: usize,
    /// Default push-constant block, replaceable per dispatch.
    push_constant_data: Mutex<Vec<u8>>,
    shader_module: vk::ShaderModule,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Algorithm")
            .field("id", &self.id)
            .field("workgroup", &self.workgroup)
            .field("push_constant_size", &self.push_constant_size)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl Algorithm {
    /// Builds the full pipeline state for `spirv` over `resources`.
    ///
    /// `push_constants` fixes both the push-constant block size and its
    /// default contents; pass `None` for kernels without push constants.
    pub(crate) fn new(
        ctx: Arc<DeviceContext>,
        resources: Vec<Arc<dyn Memory>>,
        spirv: &[u32],
        workgroup: [u32; 3],
        push_constants: Option<&[u8]>,
    ) -> Result<Arc<Self>> {
        if resources.is_empty() {
            return Err(BasaltError::ResourceState(
                "algorithm requires at least one bound resource".into(),
            ));
        }
        let device = ctx.device();

        let shader_info = vk::ShaderModuleCreateInfo::default().code(spirv);
        let shader_module = unsafe { device.create_shader_module(&shader_info, None) }?;

        let mut guard = PartialPipeline::new(&ctx);
        guard.shader_module = Some(shader_module);

        // One binding per resource, in list order.
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = resources
            .iter()
            .enumerate()
            .map(|(i, r)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(i as u32)
                    .descriptor_type(r.descriptor_type())
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            })
            .collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let set_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }?;
        guard.set_layout = Some(set_layout);

        let push_constant_size = push_constants.map_or(0, <[u8]>::len);
        let set_layouts = [set_layout];
        let ranges;
        let mut pipeline_layout_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        if push_constant_size > 0 {
            ranges = [vk::PushConstantRange::default()
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .offset(0)
                .size(push_constant_size as u32)];
            pipeline_layout_info = pipeline_layout_info.push_constant_ranges(&ranges);
        }
        let pipeline_layout =
            unsafe { device.create_pipeline_layout(&pipeline_layout_info, None) }?;
        guard.pipeline_layout = Some(pipeline_layout);

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module)
            .name(c"main");
        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(pipeline_layout);
        let pipeline = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| BasaltError::from(e))?[0];
        guard.pipeline = Some(pipeline);

        // Pool sized exactly for this one set.
        let mut pool_sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for r in &resources {
            let ty = r.descriptor_type();
            match pool_sizes.iter_mut().find(|p| p.ty == ty) {
                Some(p) => p.descriptor_count += 1,
                None => pool_sizes.push(vk::DescriptorPoolSize {
                    ty,
                    descriptor_count: 1,
                }),
            }
        }
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None) }?;
        guard.descriptor_pool = Some(descriptor_pool);

        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&set_layouts);
        let descriptor_set = unsafe { device.allocate_descriptor_sets(&alloc_info) }?[0];

        // Payloads must outlive the write structs that borrow them.
        let payloads: Vec<DescriptorWrite> = resources
            .iter()
            .map(|r| r.descriptor_write())
            .collect::<Result<_>>()?;
        let mut writes = Vec::with_capacity(payloads.len());
        for (i, payload) in payloads.iter().enumerate() {
            let write = vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(i as u32)
                .descriptor_count(1)
                .descriptor_type(resources[i].descriptor_type());
            writes.push(match payload {
                DescriptorWrite::Buffer(info) => write.buffer_info(std::slice::from_ref(info)),
                DescriptorWrite::Image(info) => write.image_info(std::slice::from_ref(info)),
            });
        }
        unsafe { device.update_descriptor_sets(&writes, &[]) };

        guard.disarm();
        drop(guard);

        let id = Uuid::new_v4();
        log::debug!(
            "Algorithm {id} created: {} resources, workgroup {workgroup:?}, push constants {push_constant_size}B",
            resources.len()
        );

        Ok(Arc::new(Self {
            ctx,
            id,
            resources,
            workgroup,
            push_constant_size,
            push_constant_data: Mutex::new(push_constants.map(<[u8]>::to_vec).unwrap_or_default()),
            shader_module,
            set_layout,
            pipeline_layout,
            pipeline,
            descriptor_pool,
            descriptor_set,
            destroyed: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn resources(&self) -> &[Arc<dyn Memory>] {
        &self.resources
    }

    pub fn workgroup(&self) -> [u32; 3] {
        self.workgroup
    }

    pub fn push_constant_size(&self) -> usize {
        self.push_constant_size
    }

    pub fn is_initialized(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire)
    }

    /// Replaces the default push-constant block. The byte size must match
    /// the size fixed at construction.
    pub fn set_push_constants(&self, data: &[u8]) -> Result<()> {
        if data.len() != self.push_constant_size {
            return Err(BasaltError::PushConstantSizeMismatch {
                provided: data.len(),
                expected: self.push_constant_size,
            });
        }
        *self.push_constant_data.lock() = data.to_vec();
        Ok(())
    }

    /// Records bind + push constants + dispatch. `push_constants` overrides
    /// the stored block for this dispatch only.
    pub(crate) fn record_dispatch(
        &self,
        cmd: vk::CommandBuffer,
        push_constants: Option<&[u8]>,
    ) -> Result<()> {
        if !self.is_initialized() {
            return Err(BasaltError::ResourceState(format!(
                "dispatch recorded on destroyed algorithm {}",
                self.id
            )));
        }
        if let Some(data) = push_constants {
            self.set_push_constants(data)?;
        }
        let device = self.ctx.device();
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline_layout,
                0,
                &[self.descriptor_set],
                &[],
            );
            if self.push_constant_size > 0 {
                let data = self.push_constant_data.lock();
                device.cmd_push_constants(
                    cmd,
                    self.pipeline_layout,
                    vk::ShaderStageFlags::COMPUTE,
                    0,
                    &data,
                );
            }
            device.cmd_dispatch(
                cmd,
                self.workgroup[0],
                self.workgroup[1],
                self.workgroup[2],
            );
        }
        log::trace!("Algorithm {} dispatch recorded", self.id);
        Ok(())
    }

    /// Releases pipeline state. Idempotent; the bound resources are only
    /// un-referenced when the `Algorithm` itself drops.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("Algorithm {} destroy", self.id);
        let device = self.ctx.device();
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
            device.destroy_shader_module(self.shader_module, None);
        }
    }
}

impl Drop for Algorithm {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Cleans up partially constructed pipeline state when `Algorithm::new`
/// bails out mid-way.
struct PartialPipeline<'a> {
    ctx: &'a DeviceContext,
    shader_module: Option<vk::ShaderModule>,
    set_layout: Option<vk::DescriptorSetLayout>,
    pipeline_layout: Option<vk::PipelineLayout>,
    pipeline: Option<vk::Pipeline>,
    descriptor_pool: Option<vk::DescriptorPool>,
    armed: bool,
}

impl<'a> PartialPipeline<'a> {
    fn new(ctx: &'a DeviceContext) -> Self {
        Self {
            ctx,
            shader_module: None,
            set_layout: None,
            pipeline_layout: None,
            pipeline: None,
            descriptor_pool: None,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialPipeline<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let device = self.ctx.device();
        unsafe {
            if let Some(pool) = self.descriptor_pool {
                device.destroy_descriptor_pool(pool, None);
            }
            if let Some(pipeline) = self.pipeline {
                device.destroy_pipeline(pipeline, None);
            }
            if let Some(layout) = self.pipeline_layout {
                device.destroy_pipeline_layout(layout, None);
            }
            if let Some(layout) = self.set_layout {
                device.destroy_descriptor_set_layout(layout, None);
            }
            if let Some(module) = self.shader_module {
                device.destroy_shader_module(module, None);
            }
        }
    }
}
