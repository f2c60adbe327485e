//! Direct3D 12 backend.
//!
//! A thin translation layer: every [`Backend`] call maps onto one or a few
//! native calls. State tracking and ordering rules live above this module.

mod convert;

use std::collections::HashMap;
use std::ffi::{CString, c_void};

use raw_window_handle::RawWindowHandle;
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, RECT, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D::Fxc::{D3DCOMPILE_DEBUG, D3DCOMPILE_SKIP_OPTIMIZATION, D3DCompile};
use windows::Win32::Graphics::Direct3D::{D3D_FEATURE_LEVEL_11_0, ID3DBlob};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::{CreateEventW, INFINITE, WaitForSingleObject};
use windows::core::{HSTRING, Interface, PCSTR};

use crate::logging::CORE_TARGET;

use super::backend::{
    AllocatorId, Backend, BufferDesc, DescriptorHeapId, HeapKind, PipelineId, ResourceId,
    RootSignatureId, SwapchainDesc,
};
use super::command::Command;
use super::descriptor::{CpuDescriptor, DescriptorHeapDesc, DescriptorHeapKind, GpuDescriptor, HeapStart};
use super::error::{GpuError, GpuResult};
use super::pipeline::{PipelineDesc, ShaderSource};
use super::root_signature::{RootParameter, RootSignatureDesc};

/// Maps a native failure onto [`GpuError::Device`], naming the call.
trait NativeCall<T> {
    fn call(self, name: &'static str) -> GpuResult<T>;
}

impl<T> NativeCall<T> for windows::core::Result<T> {
    fn call(self, name: &'static str) -> GpuResult<T> {
        self.map_err(|e| GpuError::device(name, e.code().0 as u32, e.message()))
    }
}

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) }
}

fn blob_text(blob: Option<ID3DBlob>) -> String {
    blob.map(|b| String::from_utf8_lossy(blob_bytes(&b)).trim_end_matches('\0').trim().to_owned())
        .unwrap_or_default()
}

fn c_string(value: &str) -> GpuResult<CString> {
    CString::new(value).map_err(|_| GpuError::Unsupported(format!("interior NUL in '{value}'")))
}

struct NativeResource {
    resource: ID3D12Resource,
    heap: Option<HeapKind>,
    size: u64,
    /// Persistent mapping of upload buffers.
    mapped: Option<*mut u8>,
}

pub struct D3d12Backend {
    factory: IDXGIFactory4,
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
    list: ID3D12GraphicsCommandList,
    fence: ID3D12Fence,
    fence_event: HANDLE,
    hwnd: HWND,
    swapchain: Option<IDXGISwapChain3>,
    back_buffers: Vec<ResourceId>,

    heaps: Vec<ID3D12DescriptorHeap>,
    allocators: Vec<ID3D12CommandAllocator>,
    root_signatures: Vec<ID3D12RootSignature>,
    pipelines: Vec<ID3D12PipelineState>,
    resources: HashMap<ResourceId, NativeResource>,
    next_id: u32,
    debug_shaders: bool,
}

impl D3d12Backend {
    /// Creates the device, direct queue, fence and command list for `window`.
    pub fn new(window: RawWindowHandle, warp: bool, debug_layer: bool) -> GpuResult<Self> {
        let RawWindowHandle::Win32(handle) = window else {
            return Err(GpuError::Unsupported("Direct3D 12 needs a Win32 window".into()));
        };
        let hwnd = HWND(handle.hwnd.get() as *mut c_void);

        let mut factory_flags = DXGI_CREATE_FACTORY_FLAGS(0);
        if debug_layer {
            let mut debug: Option<ID3D12Debug> = None;
            match unsafe { D3D12GetDebugInterface(&mut debug) }.ok().and(debug) {
                Some(debug) => {
                    unsafe { debug.EnableDebugLayer() };
                    factory_flags |= DXGI_CREATE_FACTORY_DEBUG;
                    log::info!(target: CORE_TARGET, "D3D12 debug layer enabled");
                }
                None => log::warn!(target: CORE_TARGET, "D3D12 debug layer unavailable"),
            }
        }

        let factory: IDXGIFactory4 = unsafe { CreateDXGIFactory2(factory_flags) }.call("CreateDXGIFactory2")?;

        let adapter: IDXGIAdapter1 = if warp {
            unsafe { factory.EnumWarpAdapter() }.call("IDXGIFactory4::EnumWarpAdapter")?
        } else {
            hardware_adapter(&factory)?
        };
        let adapter_desc = unsafe { adapter.GetDesc1() }.call("IDXGIAdapter1::GetDesc1")?;
        let adapter_name = String::from_utf16_lossy(&adapter_desc.Description);
        log::info!(
            target: CORE_TARGET,
            "adapter: {}",
            adapter_name.trim_end_matches('\0')
        );

        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }.call("D3D12CreateDevice")?;
        let device = device.ok_or_else(|| GpuError::device("D3D12CreateDevice", 0, "no device returned"))?;

        let queue: ID3D12CommandQueue = unsafe {
            device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })
        }
        .call("ID3D12Device::CreateCommandQueue")?;

        // Lists from CreateCommandList1 start closed, so `execute` can always
        // begin with a reset.
        let device4: ID3D12Device4 = device.cast().call("ID3D12Device::QueryInterface(ID3D12Device4)")?;
        let list: ID3D12GraphicsCommandList = unsafe {
            device4.CreateCommandList1(0, D3D12_COMMAND_LIST_TYPE_DIRECT, D3D12_COMMAND_LIST_FLAG_NONE)
        }
        .call("ID3D12Device4::CreateCommandList1")?;

        let fence: ID3D12Fence =
            unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }.call("ID3D12Device::CreateFence")?;
        let fence_event = unsafe { CreateEventW(None, false, false, None) }.call("CreateEventW")?;

        Ok(Self {
            factory,
            device,
            queue,
            list,
            fence,
            fence_event,
            hwnd,
            swapchain: None,
            back_buffers: Vec::new(),
            heaps: Vec::new(),
            allocators: Vec::new(),
            root_signatures: Vec::new(),
            pipelines: Vec::new(),
            resources: HashMap::new(),
            next_id: 0,
            debug_shaders: debug_layer,
        })
    }

    fn alloc_id(&mut self) -> ResourceId {
        self.next_id += 1;
        ResourceId(self.next_id)
    }

    fn swapchain(&self) -> GpuResult<&IDXGISwapChain3> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| GpuError::Unsupported("swapchain not created".into()))
    }

    fn resource(&self, id: ResourceId) -> GpuResult<&ID3D12Resource> {
        self.resources
            .get(&id)
            .map(|r| &r.resource)
            .ok_or(GpuError::UnknownResource(id))
    }

    fn adopt_back_buffers(&mut self, count: u32) -> GpuResult<Vec<ResourceId>> {
        let mut ids = Vec::with_capacity(count as usize);
        for i in 0..count {
            let buffer: ID3D12Resource =
                unsafe { self.swapchain()?.GetBuffer(i) }.call("IDXGISwapChain3::GetBuffer")?;
            let _ = unsafe { buffer.SetName(&HSTRING::from(format!("seacrest back buffer {i}"))) };
            let id = self.alloc_id();
            self.resources.insert(
                id,
                NativeResource {
                    resource: buffer,
                    heap: None,
                    size: 0,
                    mapped: None,
                },
            );
            ids.push(id);
        }
        self.back_buffers = ids.clone();
        Ok(ids)
    }

    /// Surfaces device removal with its reason instead of a bare HRESULT.
    fn check_removed(&self, error: GpuError) -> GpuError {
        match error {
            GpuError::Device { code, .. }
                if code == DXGI_ERROR_DEVICE_REMOVED.0 as u32 || code == DXGI_ERROR_DEVICE_RESET.0 as u32 =>
            {
                let reason = unsafe { self.device.GetDeviceRemovedReason() };
                GpuError::DeviceRemoved(format!("{reason:?}"))
            }
            other => other,
        }
    }

    fn compile(&self, stage: &ShaderSource) -> GpuResult<ID3DBlob> {
        let entry = c_string(stage.entry_point)?;
        let target = c_string(stage.target)?;
        let flags = if self.debug_shaders {
            D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
        } else {
            0
        };

        let mut code: Option<ID3DBlob> = None;
        let mut errors: Option<ID3DBlob> = None;
        let result = unsafe {
            D3DCompile(
                stage.source.as_ptr() as *const c_void,
                stage.source.len(),
                None,
                None,
                None,
                PCSTR(entry.as_ptr() as *const u8),
                PCSTR(target.as_ptr() as *const u8),
                flags,
                0,
                &mut code,
                Some(&mut errors),
            )
        };
        if let Err(e) = result {
            return Err(GpuError::device(
                "D3DCompile",
                e.code().0 as u32,
                format!("{} {}: {}", stage.entry_point, stage.target, blob_text(errors)),
            ));
        }
        code.ok_or_else(|| GpuError::device("D3DCompile", 0, "no bytecode returned"))
    }

    fn record(&self, command: &Command) -> GpuResult<()> {
        let list = &self.list;
        match command {
            Command::Barriers(batch) => {
                let mut barriers = Vec::with_capacity(batch.len());
                for b in batch {
                    barriers.push(convert::transition(
                        self.resource(b.resource)?,
                        convert::state(b.before),
                        convert::state(b.after),
                    ));
                }
                unsafe { list.ResourceBarrier(&barriers) };
            }
            Command::SetDescriptorHeaps(ids) => {
                let heaps: Vec<Option<ID3D12DescriptorHeap>> = ids
                    .iter()
                    .map(|id| self.heaps.get(id.0 as usize).cloned())
                    .collect();
                unsafe { list.SetDescriptorHeaps(&heaps) };
            }
            Command::SetRootSignature(id) => {
                let rs = self.root_signatures.get(id.0 as usize).ok_or_else(|| {
                    GpuError::Binding(format!("unknown root signature {id:?}"))
                })?;
                unsafe { list.SetGraphicsRootSignature(rs) };
            }
            Command::SetPipeline(id) => {
                let pso = self
                    .pipelines
                    .get(id.0 as usize)
                    .ok_or_else(|| GpuError::Binding(format!("unknown pipeline {id:?}")))?;
                unsafe { list.SetPipelineState(pso) };
            }
            Command::SetViewport(v) => unsafe {
                list.RSSetViewports(&[D3D12_VIEWPORT {
                    TopLeftX: v.x,
                    TopLeftY: v.y,
                    Width: v.width,
                    Height: v.height,
                    MinDepth: v.min_depth,
                    MaxDepth: v.max_depth,
                }]);
            },
            Command::SetScissor(r) => unsafe {
                list.RSSetScissorRects(&[RECT {
                    left: r.left,
                    top: r.top,
                    right: r.right,
                    bottom: r.bottom,
                }]);
            },
            Command::SetRenderTarget { rtv, .. } => {
                let handle = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: rtv.0 };
                unsafe { list.OMSetRenderTargets(1, Some(&handle), false, None) };
            }
            Command::ClearRenderTarget { rtv, color, .. } => {
                let handle = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: rtv.0 };
                unsafe { list.ClearRenderTargetView(handle, color, None) };
            }
            Command::SetRootConstantBuffer { index, address } => unsafe {
                list.SetGraphicsRootConstantBufferView(*index, *address);
            },
            Command::SetRootDescriptorTable { index, base } => unsafe {
                list.SetGraphicsRootDescriptorTable(*index, D3D12_GPU_DESCRIPTOR_HANDLE { ptr: base.0 });
            },
            Command::SetRootConstants { index, offset, values } => unsafe {
                list.SetGraphicsRoot32BitConstants(
                    *index,
                    values.len() as u32,
                    values.as_ptr() as *const c_void,
                    *offset,
                );
            },
            Command::SetTopology(topology) => unsafe {
                list.IASetPrimitiveTopology(convert::topology(*topology));
            },
            Command::SetVertexBuffer(view) => unsafe {
                list.IASetVertexBuffers(
                    0,
                    Some(&[D3D12_VERTEX_BUFFER_VIEW {
                        BufferLocation: view.address,
                        SizeInBytes: view.size,
                        StrideInBytes: view.stride,
                    }]),
                );
            },
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => unsafe {
                list.DrawInstanced(*vertex_count, *instance_count, *first_vertex, *first_instance);
            },
            Command::CopyBuffer {
                dst,
                dst_offset,
                src,
                src_offset,
                size,
            } => {
                let (dst, src) = (self.resource(*dst)?, self.resource(*src)?);
                unsafe { list.CopyBufferRegion(dst, *dst_offset, src, *src_offset, *size) };
            }
            Command::CopyTextureToBuffer { src, dst, layout } => {
                let dst_location = D3D12_TEXTURE_COPY_LOCATION {
                    pResource: unsafe { std::mem::transmute_copy(self.resource(*dst)?) },
                    Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                    Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                        PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                            Offset: 0,
                            Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                                Format: convert::format(layout.format),
                                Width: layout.width,
                                Height: layout.height,
                                Depth: 1,
                                RowPitch: layout.row_pitch,
                            },
                        },
                    },
                };
                let src_location = D3D12_TEXTURE_COPY_LOCATION {
                    pResource: unsafe { std::mem::transmute_copy(self.resource(*src)?) },
                    Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                    Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: 0 },
                };
                unsafe { list.CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None) };
            }
        }
        Ok(())
    }
}

fn hardware_adapter(factory: &IDXGIFactory4) -> GpuResult<IDXGIAdapter1> {
    for i in 0.. {
        let Ok(adapter) = (unsafe { factory.EnumAdapters1(i) }) else {
            break;
        };
        let desc = unsafe { adapter.GetDesc1() }.call("IDXGIAdapter1::GetDesc1")?;
        if (DXGI_ADAPTER_FLAG(desc.Flags as i32) & DXGI_ADAPTER_FLAG_SOFTWARE) != DXGI_ADAPTER_FLAG_NONE {
            continue;
        }
        let probe = unsafe {
            D3D12CreateDevice(
                &adapter,
                D3D_FEATURE_LEVEL_11_0,
                std::ptr::null_mut::<Option<ID3D12Device>>(),
            )
        };
        if probe.is_ok() {
            return Ok(adapter);
        }
    }
    Err(GpuError::Unsupported(
        "no hardware adapter supports Direct3D 12 (try --warp)".into(),
    ))
}

impl Backend for D3d12Backend {
    fn name(&self) -> &'static str {
        "d3d12"
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> GpuResult<Vec<ResourceId>> {
        let swapchain_desc = DXGI_SWAP_CHAIN_DESC1 {
            BufferCount: desc.buffer_count,
            Width: desc.width,
            Height: desc.height,
            Format: convert::format(desc.format),
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            ..Default::default()
        };
        let swapchain: IDXGISwapChain1 = unsafe {
            self.factory
                .CreateSwapChainForHwnd(&self.queue, self.hwnd, &swapchain_desc, None, None)
        }
        .call("IDXGIFactory4::CreateSwapChainForHwnd")?;

        unsafe { self.factory.MakeWindowAssociation(self.hwnd, DXGI_MWA_NO_ALT_ENTER) }
            .call("IDXGIFactory4::MakeWindowAssociation")?;

        self.swapchain = Some(swapchain.cast().call("IDXGISwapChain1::QueryInterface(IDXGISwapChain3)")?);
        self.adopt_back_buffers(desc.buffer_count)
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> GpuResult<Vec<ResourceId>> {
        // Every reference to the old buffers must be gone before ResizeBuffers.
        let count = self.back_buffers.len() as u32;
        for id in std::mem::take(&mut self.back_buffers) {
            self.resources.remove(&id);
        }
        unsafe {
            self.swapchain()?
                .ResizeBuffers(count, width, height, DXGI_FORMAT_UNKNOWN, DXGI_SWAP_CHAIN_FLAG(0))
        }
        .call("IDXGISwapChain3::ResizeBuffers")
        .map_err(|e| self.check_removed(e))?;
        self.adopt_back_buffers(count)
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.swapchain
            .as_ref()
            .map(|s| unsafe { s.GetCurrentBackBufferIndex() })
            .unwrap_or(0)
    }

    fn descriptor_increment(&self, kind: DescriptorHeapKind) -> u32 {
        unsafe { self.device.GetDescriptorHandleIncrementSize(convert::heap_type(kind)) }
    }

    fn create_descriptor_heap(&mut self, desc: &DescriptorHeapDesc) -> GpuResult<HeapStart> {
        let heap: ID3D12DescriptorHeap = unsafe {
            self.device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: convert::heap_type(desc.kind),
                NumDescriptors: desc.capacity,
                Flags: if desc.shader_visible {
                    D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
                } else {
                    D3D12_DESCRIPTOR_HEAP_FLAG_NONE
                },
                NodeMask: 0,
            })
        }
        .call("ID3D12Device::CreateDescriptorHeap")?;

        let cpu = CpuDescriptor(unsafe { heap.GetCPUDescriptorHandleForHeapStart() }.ptr);
        let gpu = desc
            .shader_visible
            .then(|| GpuDescriptor(unsafe { heap.GetGPUDescriptorHandleForHeapStart() }.ptr));

        self.heaps.push(heap);
        Ok(HeapStart {
            id: DescriptorHeapId(self.heaps.len() as u32 - 1),
            cpu,
            gpu,
        })
    }

    fn create_render_target_view(&mut self, resource: ResourceId, dest: CpuDescriptor) -> GpuResult<()> {
        let resource = self.resource(resource)?;
        unsafe {
            self.device
                .CreateRenderTargetView(resource, None, D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dest.0 })
        };
        Ok(())
    }

    fn create_command_allocator(&mut self) -> GpuResult<AllocatorId> {
        let allocator: ID3D12CommandAllocator =
            unsafe { self.device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
                .call("ID3D12Device::CreateCommandAllocator")?;
        self.allocators.push(allocator);
        Ok(AllocatorId(self.allocators.len() as u32 - 1))
    }

    fn reset_command_allocator(&mut self, allocator: AllocatorId) -> GpuResult<()> {
        let native = self
            .allocators
            .get(allocator.0 as usize)
            .ok_or_else(|| GpuError::Unsupported(format!("unknown allocator {allocator:?}")))?;
        unsafe { native.Reset() }.call("ID3D12CommandAllocator::Reset")
    }

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> GpuResult<RootSignatureId> {
        // Range arrays must outlive the serialized description.
        let ranges: Vec<Vec<D3D12_DESCRIPTOR_RANGE>> = desc
            .parameters
            .iter()
            .map(|p| match p {
                RootParameter::DescriptorTable { ranges, .. } => ranges
                    .iter()
                    .map(|r| D3D12_DESCRIPTOR_RANGE {
                        RangeType: convert::range_type(r.kind),
                        NumDescriptors: r.count,
                        BaseShaderRegister: r.base_register,
                        RegisterSpace: r.space,
                        OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
                    })
                    .collect(),
                _ => Vec::new(),
            })
            .collect();

        let parameters: Vec<D3D12_ROOT_PARAMETER> = desc
            .parameters
            .iter()
            .zip(&ranges)
            .map(|(p, table)| {
                let descriptor = |register: u32, space: u32| D3D12_ROOT_PARAMETER_0 {
                    Descriptor: D3D12_ROOT_DESCRIPTOR {
                        ShaderRegister: register,
                        RegisterSpace: space,
                    },
                };
                let (kind, anonymous, visibility) = match p {
                    RootParameter::Constants {
                        register,
                        space,
                        count,
                        visibility,
                    } => (
                        D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
                        D3D12_ROOT_PARAMETER_0 {
                            Constants: D3D12_ROOT_CONSTANTS {
                                ShaderRegister: *register,
                                RegisterSpace: *space,
                                Num32BitValues: *count,
                            },
                        },
                        *visibility,
                    ),
                    RootParameter::ConstantBuffer {
                        register,
                        space,
                        visibility,
                    } => (D3D12_ROOT_PARAMETER_TYPE_CBV, descriptor(*register, *space), *visibility),
                    RootParameter::ShaderResource {
                        register,
                        space,
                        visibility,
                    } => (D3D12_ROOT_PARAMETER_TYPE_SRV, descriptor(*register, *space), *visibility),
                    RootParameter::UnorderedAccess {
                        register,
                        space,
                        visibility,
                    } => (D3D12_ROOT_PARAMETER_TYPE_UAV, descriptor(*register, *space), *visibility),
                    RootParameter::DescriptorTable { visibility, .. } => (
                        D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                        D3D12_ROOT_PARAMETER_0 {
                            DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                                NumDescriptorRanges: table.len() as u32,
                                pDescriptorRanges: table.as_ptr(),
                            },
                        },
                        *visibility,
                    ),
                };
                D3D12_ROOT_PARAMETER {
                    ParameterType: kind,
                    Anonymous: anonymous,
                    ShaderVisibility: convert::visibility(visibility),
                }
            })
            .collect();

        let samplers: Vec<D3D12_STATIC_SAMPLER_DESC> =
            desc.static_samplers.iter().map(convert::static_sampler).collect();

        let native = D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: parameters.len() as u32,
            pParameters: parameters.as_ptr(),
            NumStaticSamplers: samplers.len() as u32,
            pStaticSamplers: samplers.as_ptr(),
            Flags: if desc.allow_input_layout {
                D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT
            } else {
                D3D12_ROOT_SIGNATURE_FLAG_NONE
            },
        };

        let mut blob: Option<ID3DBlob> = None;
        let mut errors: Option<ID3DBlob> = None;
        if unsafe {
            D3D12SerializeRootSignature(&native, D3D_ROOT_SIGNATURE_VERSION_1, &mut blob, Some(&mut errors))
        }
        .is_err()
        {
            return Err(GpuError::RootSignature(blob_text(errors)));
        }
        let blob = blob.ok_or_else(|| GpuError::RootSignature("serializer returned no blob".into()))?;

        let root_signature: ID3D12RootSignature = unsafe { self.device.CreateRootSignature(0, blob_bytes(&blob)) }
            .call("ID3D12Device::CreateRootSignature")?;
        self.root_signatures.push(root_signature);
        Ok(RootSignatureId(self.root_signatures.len() as u32 - 1))
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> GpuResult<PipelineId> {
        let root_signature = self
            .root_signatures
            .get(desc.root_signature.0 as usize)
            .ok_or_else(|| GpuError::Binding(format!("pipeline '{}': unknown root signature", desc.label)))?;

        let vertex = self.compile(&desc.vertex)?;
        let pixel = self.compile(&desc.pixel)?;

        let semantics = desc
            .vertex_layout
            .iter()
            .map(|a| c_string(a.semantic))
            .collect::<GpuResult<Vec<_>>>()?;
        let elements: Vec<D3D12_INPUT_ELEMENT_DESC> = desc
            .vertex_layout
            .iter()
            .zip(&semantics)
            .map(|(a, name)| D3D12_INPUT_ELEMENT_DESC {
                SemanticName: PCSTR(name.as_ptr() as *const u8),
                SemanticIndex: 0,
                Format: convert::vertex_format(a.format),
                InputSlot: 0,
                AlignedByteOffset: a.offset,
                InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            })
            .collect();

        let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
        rtv_formats[0] = convert::format(desc.render_target_format);

        let pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            pRootSignature: unsafe { std::mem::transmute_copy(root_signature) },
            VS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: unsafe { vertex.GetBufferPointer() },
                BytecodeLength: unsafe { vertex.GetBufferSize() },
            },
            PS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: unsafe { pixel.GetBufferPointer() },
                BytecodeLength: unsafe { pixel.GetBufferSize() },
            },
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: elements.as_ptr(),
                NumElements: elements.len() as u32,
            },
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: D3D12_FILL_MODE_SOLID,
                CullMode: D3D12_CULL_MODE_NONE,
                DepthClipEnable: true.into(),
                ..Default::default()
            },
            BlendState: D3D12_BLEND_DESC {
                AlphaToCoverageEnable: false.into(),
                IndependentBlendEnable: false.into(),
                RenderTarget: [D3D12_RENDER_TARGET_BLEND_DESC {
                    BlendEnable: false.into(),
                    LogicOpEnable: false.into(),
                    SrcBlend: D3D12_BLEND_ONE,
                    DestBlend: D3D12_BLEND_ZERO,
                    BlendOp: D3D12_BLEND_OP_ADD,
                    SrcBlendAlpha: D3D12_BLEND_ONE,
                    DestBlendAlpha: D3D12_BLEND_ZERO,
                    BlendOpAlpha: D3D12_BLEND_OP_ADD,
                    LogicOp: D3D12_LOGIC_OP_NOOP,
                    RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
                }; 8],
            },
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: false.into(),
                StencilEnable: false.into(),
                ..Default::default()
            },
            SampleMask: u32::MAX,
            PrimitiveTopologyType: convert::topology_type(desc.topology),
            NumRenderTargets: 1,
            RTVFormats: rtv_formats,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            ..Default::default()
        };

        let pipeline: windows::core::Result<ID3D12PipelineState> =
            unsafe { self.device.CreateGraphicsPipelineState(&pso_desc) };
        let pipeline = pipeline.call("ID3D12Device::CreateGraphicsPipelineState")?;

        let _ = unsafe { pipeline.SetName(&HSTRING::from(desc.label)) };
        self.pipelines.push(pipeline);
        Ok(PipelineId(self.pipelines.len() as u32 - 1))
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> GpuResult<ResourceId> {
        let heap_type = match desc.heap {
            HeapKind::Default => D3D12_HEAP_TYPE_DEFAULT,
            HeapKind::Upload => D3D12_HEAP_TYPE_UPLOAD,
            HeapKind::Readback => D3D12_HEAP_TYPE_READBACK,
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: desc.size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            ..Default::default()
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &D3D12_HEAP_PROPERTIES {
                    Type: heap_type,
                    ..Default::default()
                },
                D3D12_HEAP_FLAG_NONE,
                &resource_desc,
                convert::state(desc.heap.initial_state()),
                None,
                &mut resource,
            )
        }
        .call("ID3D12Device::CreateCommittedResource")?;
        let resource =
            resource.ok_or_else(|| GpuError::device("ID3D12Device::CreateCommittedResource", 0, "no resource"))?;
        let _ = unsafe { resource.SetName(&HSTRING::from(desc.label)) };

        let mapped = if desc.heap == HeapKind::Upload {
            let mut ptr: *mut c_void = std::ptr::null_mut();
            let nothing_read = D3D12_RANGE { Begin: 0, End: 0 };
            unsafe { resource.Map(0, Some(&nothing_read), Some(&mut ptr)) }.call("ID3D12Resource::Map")?;
            Some(ptr as *mut u8)
        } else {
            None
        };

        let id = self.alloc_id();
        self.resources.insert(
            id,
            NativeResource {
                resource,
                heap: Some(desc.heap),
                size: desc.size,
                mapped,
            },
        );
        Ok(id)
    }

    fn buffer_address(&self, buffer: ResourceId) -> GpuResult<u64> {
        Ok(unsafe { self.resource(buffer)?.GetGPUVirtualAddress() })
    }

    fn write_buffer(&mut self, buffer: ResourceId, offset: u64, data: &[u8]) -> GpuResult<()> {
        let native = self.resources.get(&buffer).ok_or(GpuError::UnknownResource(buffer))?;
        let Some(ptr) = native.mapped else {
            return Err(GpuError::Binding(format!("{buffer:?} is not CPU writable")));
        };
        if offset + data.len() as u64 > native.size {
            return Err(GpuError::Binding(format!("write past the end of {buffer:?}")));
        }
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len()) };
        Ok(())
    }

    fn read_buffer(&mut self, buffer: ResourceId, offset: u64, out: &mut [u8]) -> GpuResult<()> {
        let native = self.resources.get(&buffer).ok_or(GpuError::UnknownResource(buffer))?;
        if native.heap != Some(HeapKind::Readback) {
            return Err(GpuError::Binding(format!("{buffer:?} is not CPU readable")));
        }
        if offset + out.len() as u64 > native.size {
            return Err(GpuError::Binding(format!("read past the end of {buffer:?}")));
        }

        let range = D3D12_RANGE {
            Begin: offset as usize,
            End: offset as usize + out.len(),
        };
        let mut ptr: *mut c_void = std::ptr::null_mut();
        unsafe { native.resource.Map(0, Some(&range), Some(&mut ptr)) }.call("ID3D12Resource::Map")?;
        unsafe {
            std::ptr::copy_nonoverlapping((ptr as *const u8).add(offset as usize), out.as_mut_ptr(), out.len());
            native.resource.Unmap(0, Some(&D3D12_RANGE { Begin: 0, End: 0 }));
        }
        Ok(())
    }

    fn release(&mut self, resource: ResourceId) {
        if let Some(native) = self.resources.remove(&resource) {
            if native.mapped.is_some() {
                unsafe { native.resource.Unmap(0, None) };
            }
        }
    }

    fn execute(&mut self, allocator: AllocatorId, commands: &[Command]) -> GpuResult<()> {
        let native = self
            .allocators
            .get(allocator.0 as usize)
            .ok_or_else(|| GpuError::Unsupported(format!("unknown allocator {allocator:?}")))?;
        unsafe { self.list.Reset(native, None) }.call("ID3D12GraphicsCommandList::Reset")?;

        for command in commands {
            self.record(command)?;
        }

        unsafe { self.list.Close() }.call("ID3D12GraphicsCommandList::Close")?;
        let list: ID3D12CommandList = self.list.cast().call("ID3D12GraphicsCommandList::QueryInterface")?;
        unsafe { self.queue.ExecuteCommandLists(&[Some(list)]) };
        Ok(())
    }

    fn signal(&mut self, value: u64) -> GpuResult<()> {
        unsafe { self.queue.Signal(&self.fence, value) }
            .call("ID3D12CommandQueue::Signal")
            .map_err(|e| self.check_removed(e))
    }

    fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    fn wait_for_value(&mut self, value: u64) -> GpuResult<()> {
        if self.completed_value() >= value {
            return Ok(());
        }
        unsafe { self.fence.SetEventOnCompletion(value, self.fence_event) }
            .call("ID3D12Fence::SetEventOnCompletion")?;
        let result = unsafe { WaitForSingleObject(self.fence_event, INFINITE) };
        if result != WAIT_OBJECT_0 {
            return Err(GpuError::device("WaitForSingleObject", result.0, "fence wait failed"));
        }
        // A removed device reports u64::MAX as its completed value.
        if self.completed_value() == u64::MAX {
            return Err(self.check_removed(GpuError::device(
                "ID3D12Fence::GetCompletedValue",
                DXGI_ERROR_DEVICE_REMOVED.0 as u32,
                "device removed during wait",
            )));
        }
        Ok(())
    }

    fn present(&mut self, sync_interval: u32) -> GpuResult<()> {
        unsafe { self.swapchain()?.Present(sync_interval, DXGI_PRESENT(0)) }
            .ok()
            .call("IDXGISwapChain3::Present")
            .map_err(|e| self.check_removed(e))
    }
}

impl Drop for D3d12Backend {
    fn drop(&mut self) {
        for id in self.resources.keys().copied().collect::<Vec<_>>() {
            self.release(id);
        }
        if let Err(e) = unsafe { CloseHandle(self.fence_event) } {
            log::warn!(target: CORE_TARGET, "failed to close fence event: {e}");
        }
    }
}

