use std::{
    borrow::Cow,
    marker::PhantomData,
    sync::{Arc, Mutex},
};

use rustc_hash::FxHashMap as HashMap;
use wgpu::util::DeviceExt;

use super::{Device, DeviceId, DeviceKind, Parallelism, shader};
use crate::{
    error::{AllocationError, CopyError, DeviceResolutionError, DispatchError},
    num::Scalar,
    ops::{BinaryOp, Kernel},
    platform,
    work::{WorkDiv, WorkDivPolicy},
};

/// Default number of elements each invocation processes.
pub const GPU_ELEMS_PER_THREAD: usize = 1;

/// Device memory holding `len` elements of `T`.
#[derive(Debug, Clone)]
pub struct GpuBuffer<T> {
    buffer: wgpu::Buffer,
    len: usize,
    phantom: PhantomData<T>,
}

impl<T: Scalar> GpuBuffer<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn size(&self) -> u64 {
        (self.len * T::DATA_TYPE.size()) as u64
    }
}

#[derive(Debug)]
struct Context {
    /// Handle to a WebGPU compute device.
    device: wgpu::Device,
    /// The WebGPU command queue.
    queue: wgpu::Queue,
    info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
    /// Compiled pipelines keyed by their shader source.
    pipelines: Mutex<HashMap<String, wgpu::ComputePipeline>>,
}

/// A WebGPU adapter opened as a compute device.
///
/// Each resolution opens a fresh logical device with its own [`DeviceId`].
#[derive(Debug, Clone)]
pub struct Gpu {
    id: DeviceId,
    context: Arc<Context>,
    policy: WorkDivPolicy,
}

impl Gpu {
    #[inline]
    pub fn info(&self) -> &wgpu::AdapterInfo {
        &self.context.info
    }

    #[inline]
    pub fn limits(&self) -> &wgpu::Limits {
        &self.context.limits
    }
}

pub struct GpuBuilder {
    pub index: u32,
    pub backends: wgpu::Backends,
    pub features: wgpu::Features,
    /// Limits to request. Defaults to everything the adapter supports.
    pub limits: Option<wgpu::Limits>,
    pub policy: WorkDivPolicy,
}

impl GpuBuilder {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            backends: wgpu::Backends::all(),
            features: wgpu::Features::empty(),
            limits: None,
            policy: WorkDivPolicy::new(GPU_ELEMS_PER_THREAD),
        }
    }

    pub fn backends(mut self, backends: wgpu::Backends) -> Self {
        self.backends = backends;
        self
    }

    pub fn features(mut self, features: wgpu::Features) -> Self {
        self.features = features;
        self
    }

    pub fn limits(mut self, limits: wgpu::Limits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn work_div(mut self, policy: WorkDivPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn build(self) -> Result<Gpu, DeviceResolutionError> {
        let Self {
            index,
            backends,
            features,
            limits,
            policy,
        } = self;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let adapters = instance.enumerate_adapters(backends);
        let count = adapters.len();
        let adapter = adapters
            .into_iter()
            .nth(index as usize)
            .ok_or(DeviceResolutionError::NotFound {
                kind: DeviceKind::Gpu,
                index,
                count,
            })?;

        let info = adapter.get_info();
        let limits = limits.unwrap_or_else(|| adapter.limits());
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: features,
                required_limits: limits,
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await?;
        let limits = device.limits();

        let id = DeviceId::Gpu {
            index,
            instance: uid::Id::new(),
        };
        log::info!("resolved {id}: {} ({:?})", info.name, info.backend);

        let pipelines = Mutex::new(HashMap::default());
        let context = Arc::new(Context {
            device,
            queue,
            info,
            limits,
            pipelines,
        });
        Ok(Gpu {
            id,
            context,
            policy,
        })
    }
}

/// Partition parameters as laid out in the shader's uniform `Division`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Division {
    len: u32,
    elems: u32,
    units: u32,
    stride: u32,
}

// SAFETY: `Division` is `repr(C)` with only `u32` fields and no padding.
unsafe impl bytemuck::Zeroable for Division {}
unsafe impl bytemuck::Pod for Division {}

impl Gpu {
    /// Lays out the units of `div` over a two-dimensional dispatch.
    fn division(&self, div: WorkDiv, len: usize) -> Result<(Division, [u32; 3]), DispatchError> {
        let err = |reason| DispatchError::WorkDiv { div, len, reason };
        let indexing = "extent exceeds 32-bit indexing";

        let len = u32::try_from(len).map_err(|_| err(indexing))?;
        let units = u32::try_from(div.threads).map_err(|_| err(indexing))?;
        let elems = u32::try_from(div.elems).map_err(|_| err(indexing))?;
        if units.checked_mul(elems).is_none() {
            return Err(err(indexing));
        }

        let max = self.context.limits.max_compute_workgroups_per_dimension;
        let groups = units.div_ceil(shader::WORKGROUP_SIZE);
        let x = groups.min(max).max(1);
        let y = groups.div_ceil(x);
        if y > max {
            return Err(err("exceeds the dispatch limits"));
        }

        let stride = x * shader::WORKGROUP_SIZE;
        let division = Division {
            len,
            elems,
            units,
            stride,
        };
        Ok((division, [x, y, 1]))
    }

    async fn pipeline(&self, source: &str) -> Result<wgpu::ComputePipeline, DispatchError> {
        let cached = self
            .context
            .pipelines
            .lock()
            .expect("failed to lock")
            .get(source)
            .cloned();
        if let Some(pipeline) = cached {
            return Ok(pipeline);
        }

        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: None,
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: None,
            layout: None,
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(err) = device.pop_error_scope().await {
            return Err(DispatchError::Rejected(err.to_string()));
        }

        log::debug!("compiled pipeline on {}", self.id);
        self.context
            .pipelines
            .lock()
            .expect("failed to lock")
            .insert(source.to_owned(), pipeline.clone());
        Ok(pipeline)
    }

    /// Runs `source` once per unit of `div`. `buffers` are bound in order, followed by the division.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all, fields(device = %self.id, %div)))]
    async fn dispatch(
        &self,
        source: String,
        div: WorkDiv,
        len: usize,
        buffers: &[&wgpu::Buffer],
    ) -> Result<(), DispatchError> {
        div.check(len)?;
        let (division, [x, y, z]) = self.division(div, len)?;
        if len == 0 {
            return Ok(());
        }

        let pipeline = self.pipeline(&source).await?;
        let Context { device, queue, .. } = &*self.context;

        let uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: None,
            contents: bytemuck::bytes_of(&division),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let entries: Vec<_> = buffers
            .iter()
            .copied()
            .chain(Some(&uniform))
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let layout = pipeline.get_bind_group_layout(0);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &layout,
            entries: &entries,
        });

        let mut encoder = device.create_command_encoder(&Default::default());
        {
            let mut pass = encoder.begin_compute_pass(&Default::default());
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(x, y, z);
        }
        queue.submit(Some(encoder.finish()));

        match device.pop_error_scope().await {
            Some(err) => Err(DispatchError::Rejected(err.to_string())),
            None => Ok(()),
        }
    }

    fn unsupported<T: Scalar>(&self, reason: &'static str) -> DispatchError {
        DispatchError::Unsupported {
            device: self.id,
            r#type: T::DATA_TYPE,
            reason,
        }
    }

    fn launch_source<T: Scalar, K: Kernel<T>>(&self, kernel: &K) -> Result<String, DispatchError> {
        let ty = T::DATA_TYPE
            .wgsl()
            .ok_or_else(|| self.unsupported::<T>("no device representation"))?;
        let expr = kernel
            .wgsl(ty)
            .ok_or_else(|| self.unsupported::<T>("kernel has no device form"))?;
        Ok(shader::launch(ty, &expr))
    }

    fn transform_source<T: Scalar, Op: BinaryOp<T>>(&self, op: &Op) -> Result<String, DispatchError> {
        let ty = T::DATA_TYPE
            .wgsl()
            .ok_or_else(|| self.unsupported::<T>("no device representation"))?;
        let expr = op
            .wgsl()
            .ok_or_else(|| self.unsupported::<T>("operation has no device form"))?;
        Ok(shader::transform(ty, &expr))
    }
}

impl Device for Gpu {
    type Buffer<T: Scalar> = GpuBuffer<T>;

    async fn resolve(index: u32) -> Result<Self, DeviceResolutionError> {
        GpuBuilder::new(index).build().await
    }

    #[inline]
    fn id(&self) -> DeviceId {
        self.id
    }

    #[inline]
    fn parallelism(&self) -> Parallelism {
        Parallelism::Workgroups
    }

    #[inline]
    fn policy(&self) -> WorkDivPolicy {
        self.policy
    }

    fn allocate<T: Scalar>(&self, len: usize) -> Result<GpuBuffer<T>, AllocationError> {
        if T::DATA_TYPE.wgsl().is_none() {
            return Err(AllocationError::UnsupportedType {
                device: self.id,
                r#type: T::DATA_TYPE,
            });
        }
        let size = len
            .checked_mul(T::DATA_TYPE.size())
            .ok_or(AllocationError::Extent { len })?;

        let limits = &self.context.limits;
        let fits = (size as u64) <= limits.max_buffer_size
            && (size as u64) <= limits.max_storage_buffer_binding_size as u64;
        if !fits {
            return Err(AllocationError::OutOfMemory {
                device: self.id,
                size,
            });
        }

        let buffer = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size: (size as u64).max(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Ok(GpuBuffer {
            buffer,
            len,
            phantom: PhantomData,
        })
    }

    async fn download<T: Scalar>(&self, buffer: &GpuBuffer<T>) -> Result<Box<[T]>, CopyError> {
        if buffer.is_empty() {
            return Ok(Box::new([]));
        }

        let Context { device, queue, .. } = &*self.context;
        let (sender, receiver) = flume::bounded(1);
        wgpu::util::DownloadBuffer::read_buffer(
            device,
            queue,
            &buffer.buffer.slice(..buffer.size()),
            move |data| {
                let data = data.map(|data| bytemuck::pod_collect_to_vec::<u8, T>(&data));
                _ = sender.send(data)
            },
        );

        let device = device.clone();
        platform::spawn_blocking(move || device.poll(wgpu::PollType::Wait))
            .await
            .map_err(|err| CopyError::Transfer(err.to_string()))?
            .map_err(|err| CopyError::Transfer(err.to_string()))?;
        let data = receiver
            .recv_async()
            .await
            .map_err(|err| CopyError::Transfer(err.to_string()))??;
        Ok(data.into_boxed_slice())
    }

    async fn upload<T: Scalar>(&self, buffer: &GpuBuffer<T>, data: Box<[T]>) -> Result<(), CopyError> {
        if data.len() != buffer.len() {
            return Err(CopyError::LengthMismatch {
                src: data.len(),
                dst: buffer.len(),
            });
        }
        if data.is_empty() {
            return Ok(());
        }
        let queue = &self.context.queue;
        queue.write_buffer(&buffer.buffer, 0, bytemuck::cast_slice(&data));
        queue.submit(None);
        Ok(())
    }

    async fn copy<T: Scalar>(&self, src: &GpuBuffer<T>, dst: &GpuBuffer<T>) -> Result<(), CopyError> {
        if src.len() != dst.len() {
            return Err(CopyError::LengthMismatch {
                src: src.len(),
                dst: dst.len(),
            });
        }
        if src.is_empty() {
            return Ok(());
        }
        let Context { device, queue, .. } = &*self.context;
        let mut encoder = device.create_command_encoder(&Default::default());
        encoder.copy_buffer_to_buffer(&src.buffer, 0, &dst.buffer, 0, src.size());
        queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn check_launch<T: Scalar, K: Kernel<T>>(&self, kernel: &K) -> Result<(), DispatchError> {
        self.launch_source(kernel).map(|_| ())
    }

    fn check_transform<T: Scalar, Op: BinaryOp<T>>(&self, op: &Op) -> Result<(), DispatchError> {
        self.transform_source(op).map(|_| ())
    }

    async fn launch<T: Scalar, K: Kernel<T>>(
        &self,
        div: WorkDiv,
        kernel: K,
        output: &GpuBuffer<T>,
    ) -> Result<(), DispatchError> {
        let source = self.launch_source(&kernel)?;
        self.dispatch(source, div, output.len(), &[&output.buffer])
            .await
    }

    async fn transform<T: Scalar, Op: BinaryOp<T>>(
        &self,
        div: WorkDiv,
        lhs: &GpuBuffer<T>,
        rhs: &GpuBuffer<T>,
        output: &GpuBuffer<T>,
        op: Op,
    ) -> Result<(), DispatchError> {
        for input in [lhs, rhs] {
            if input.len() != output.len() {
                return Err(DispatchError::LengthMismatch {
                    lhs: input.len(),
                    rhs: output.len(),
                });
            }
        }
        let source = self.transform_source(&op)?;
        let buffers = [&lhs.buffer, &rhs.buffer, &output.buffer];
        self.dispatch(source, div, output.len(), &buffers).await
    }

    async fn synchronize(&self) {
        let device = self.context.device.clone();
        match platform::spawn_blocking(move || device.poll(wgpu::PollType::Wait)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => log::error!("failed to synchronize {}: {err}", self.id),
            Err(err) => log::error!("failed to synchronize {}: {err}", self.id),
        }
    }
}
