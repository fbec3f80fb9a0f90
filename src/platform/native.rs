// Copyright 2024-2026 snpe-rt Contributors
// SPDX-License-Identifier: Apache-2.0

//! Native SNPE backend over the C API, resolved at runtime with `libloading`.
//!
//! Every symbol is looked up once when the bundle is loaded; a missing
//! symbol fails the load with `SymbolMissing`. Handles never leave this
//! module. Tensors cross the boundary as float32 `ITensor`s; encoding
//! conversion happens on the session side of [`TensorView`].

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::sync::Arc;

use libloading::Library;

use super::{
    emit, BuildOptions, Executor, LibraryBundle, LogLevel, Platform, RuntimeFactory, TensorView,
    TensorViewMut,
};
use crate::accelerator::{Accelerator, ExecutionPriority, PerformanceProfile};
use crate::error::{ErrorKind, Result, RuntimeError};
use crate::network::NetworkContainer;
use crate::session::convert;

type Handle = *mut c_void;
type ErrorCode = c_int;

const SNPE_SUCCESS: ErrorCode = 0;

// Snpe_Runtime_t
const RUNTIME_CPU: c_int = 0;
const RUNTIME_GPU: c_int = 1;
const RUNTIME_DSP: c_int = 2;
const RUNTIME_GPU_FLOAT16: c_int = 3;
const RUNTIME_AIP: c_int = 5;

// Snpe_PerformanceProfile_t
fn profile_code(profile: PerformanceProfile) -> c_int {
    match profile {
        PerformanceProfile::Default => 0,
        PerformanceProfile::Balanced => 1,
        PerformanceProfile::HighPerformance => 2,
        PerformanceProfile::PowerSaver => 3,
        PerformanceProfile::SustainedHighPerformance => 5,
        PerformanceProfile::Burst => 6,
    }
}

// Snpe_ExecutionPriorityHint_t
fn priority_code(priority: ExecutionPriority) -> c_int {
    match priority {
        ExecutionPriority::Normal => 0,
        ExecutionPriority::High => 1,
        ExecutionPriority::Low => 2,
    }
}

// Snpe_LogLevel_t
fn log_level_code(level: LogLevel) -> c_int {
    match level {
        LogLevel::Fatal => 0,
        LogLevel::Error => 1,
        LogLevel::Warn => 2,
        LogLevel::Info => 3,
        LogLevel::Verbose => 4,
    }
}

/// HTP is reached through the DSP runtime code.
fn runtime_code(accelerator: Accelerator) -> c_int {
    match accelerator {
        Accelerator::Cpu => RUNTIME_CPU,
        Accelerator::Gpu => RUNTIME_GPU,
        Accelerator::GpuFloat16 => RUNTIME_GPU_FLOAT16,
        Accelerator::Dsp | Accelerator::Htp => RUNTIME_DSP,
        Accelerator::Aip => RUNTIME_AIP,
    }
}

macro_rules! symbol_table {
    ($($field:ident : fn($($arg:ty),*) -> $ret:ty = $name:literal;)*) => {
        struct Symbols {
            $($field: unsafe extern "C" fn($($arg),*) -> $ret,)*
        }

        impl Symbols {
            fn resolve(lib: &Library) -> Result<Self> {
                Ok(Self {
                    $($field: {
                        // SAFETY: the signature matches the SNPE C header for this symbol.
                        let sym = unsafe {
                            lib.get::<unsafe extern "C" fn($($arg),*) -> $ret>(concat!($name, "\0").as_bytes())
                        }
                        .map_err(|e| RuntimeError::new(
                            ErrorKind::SymbolMissing,
                            format!("{}: {}", $name, e),
                        ))?;
                        *sym
                    },)*
                })
            }
        }
    };
}

symbol_table! {
    get_library_version: fn() -> Handle = "Snpe_Util_GetLibraryVersion";
    version_to_string: fn(Handle) -> *const c_char = "Snpe_DlVersion_ToString";
    version_delete: fn(Handle) -> ErrorCode = "Snpe_DlVersion_Delete";
    is_runtime_available: fn(c_int) -> c_int = "Snpe_Util_IsRuntimeAvailable";
    initialize_logging: fn(c_int) -> ErrorCode = "Snpe_Util_InitializeLogging";
    set_log_level: fn(c_int) -> ErrorCode = "Snpe_Util_SetLogLevel";
    last_error: fn() -> *const c_char = "Snpe_ErrorCode_GetLastErrorString";
    container_open_buffer: fn(*const u8, usize) -> Handle = "Snpe_DlContainer_OpenBuffer";
    container_delete: fn(Handle) -> ErrorCode = "Snpe_DlContainer_Delete";
    runtime_list_create: fn() -> Handle = "Snpe_RuntimeList_Create";
    runtime_list_add: fn(Handle, c_int) -> ErrorCode = "Snpe_RuntimeList_Add";
    runtime_list_delete: fn(Handle) -> ErrorCode = "Snpe_RuntimeList_Delete";
    string_list_create: fn() -> Handle = "Snpe_StringList_Create";
    string_list_append: fn(Handle, *const c_char) -> ErrorCode = "Snpe_StringList_Append";
    string_list_delete: fn(Handle) -> ErrorCode = "Snpe_StringList_Delete";
    platform_config_create: fn() -> Handle = "Snpe_PlatformConfig_Create";
    platform_config_set_options: fn(Handle, *const c_char) -> c_int = "Snpe_PlatformConfig_SetPlatformOptions";
    platform_config_delete: fn(Handle) -> ErrorCode = "Snpe_PlatformConfig_Delete";
    builder_create: fn(Handle) -> Handle = "Snpe_SNPEBuilder_Create";
    builder_set_runtime_order: fn(Handle, Handle) -> ErrorCode = "Snpe_SNPEBuilder_SetRuntimeProcessorOrder";
    builder_set_profile: fn(Handle, c_int) -> ErrorCode = "Snpe_SNPEBuilder_SetPerformanceProfile";
    builder_set_priority: fn(Handle, c_int) -> ErrorCode = "Snpe_SNPEBuilder_SetExecutionPriorityHint";
    builder_set_outputs: fn(Handle, Handle) -> ErrorCode = "Snpe_SNPEBuilder_SetOutputTensors";
    builder_set_user_buffers: fn(Handle, c_int) -> ErrorCode = "Snpe_SNPEBuilder_SetUseUserSuppliedBuffers";
    builder_set_init_cache: fn(Handle, c_int) -> ErrorCode = "Snpe_SNPEBuilder_SetInitCacheMode";
    builder_set_platform_config: fn(Handle, Handle) -> ErrorCode = "Snpe_SNPEBuilder_SetPlatformConfig";
    builder_build: fn(Handle) -> Handle = "Snpe_SNPEBuilder_Build";
    builder_delete: fn(Handle) -> ErrorCode = "Snpe_SNPEBuilder_Delete";
    snpe_execute: fn(Handle, Handle, Handle) -> ErrorCode = "Snpe_SNPE_ExecuteITensors";
    snpe_delete: fn(Handle) -> ErrorCode = "Snpe_SNPE_Delete";
    tensor_map_create: fn() -> Handle = "Snpe_TensorMap_Create";
    tensor_map_add: fn(Handle, *const c_char, Handle) -> () = "Snpe_TensorMap_Add";
    tensor_map_get: fn(Handle, *const c_char) -> Handle = "Snpe_TensorMap_GetTensor_Ref";
    tensor_map_delete: fn(Handle) -> ErrorCode = "Snpe_TensorMap_Delete";
    shape_create: fn(*const usize, usize) -> Handle = "Snpe_TensorShape_CreateDimsSize";
    shape_delete: fn(Handle) -> ErrorCode = "Snpe_TensorShape_Delete";
    create_itensor: fn(Handle) -> Handle = "Snpe_Util_CreateITensor";
    itensor_data: fn(Handle) -> *mut c_void = "Snpe_ITensor_GetData";
    itensor_size: fn(Handle) -> usize = "Snpe_ITensor_GetSize";
    itensor_delete: fn(Handle) -> ErrorCode = "Snpe_ITensor_Delete";
}

type Deleter = unsafe extern "C" fn(Handle) -> ErrorCode;

/// An SNPE handle deleted on drop.
struct Owned {
    handle: Handle,
    delete: Deleter,
}

impl Owned {
    /// `None` when the create call returned null.
    fn new(handle: Handle, delete: Deleter) -> Option<Self> {
        (!handle.is_null()).then_some(Self { handle, delete })
    }
}

impl Drop for Owned {
    fn drop(&mut self) {
        // SAFETY: non-null, owned here, and paired with its own delete function.
        unsafe {
            (self.delete)(self.handle);
        }
    }
}

struct Bundle {
    symbols: Symbols,
    // Unloaded before the core library they link against.
    _companions: Vec<Library>,
    // Keeps the mapped library alive as long as any symbol may be called.
    _library: Library,
}

impl Bundle {
    fn own(&self, handle: Handle, delete: Deleter, what: &str) -> Result<Owned> {
        Owned::new(handle, delete).ok_or_else(|| {
            RuntimeError::executor_failure(format!("{} returned null: {}", what, self.last_error()))
        })
    }

    fn last_error(&self) -> String {
        // SAFETY: returns a pointer to a static, NUL-terminated buffer or null.
        unsafe {
            let ptr = (self.symbols.last_error)();
            if ptr.is_null() {
                "unknown SNPE error".to_string()
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        }
    }

    fn check(&self, code: ErrorCode, what: &str) -> Result<()> {
        if code == SNPE_SUCCESS {
            Ok(())
        } else {
            Err(RuntimeError::executor_failure(format!("{} failed: {}", what, self.last_error())))
        }
    }
}

/// The loaded SNPE bundle.
pub struct NativePlatform {
    bundle: Arc<Bundle>,
}

impl NativePlatform {
    pub fn load(bundle: &LibraryBundle) -> Result<Self> {
        // SAFETY: loading the vendor library runs its initializers; the
        // bundle path was resolved from configured search directories.
        let library = unsafe { Library::new(&bundle.core) }.map_err(|e| {
            RuntimeError::platform_unavailable(format!("{}: {}", bundle.core.display(), e))
        })?;
        let mut companions = Vec::new();
        for load in bundle.companion_loads() {
            // SAFETY: as above; companions come from the same resolved bundle.
            match unsafe { Library::new(&load.path) } {
                Ok(lib) => companions.push(lib),
                Err(e) if load.required => {
                    return Err(RuntimeError::platform_unavailable(format!(
                        "{}: {}",
                        load.path.display(),
                        e
                    )))
                }
                Err(e) => emit(LogLevel::Warn, &format!("skipping {}: {}", load.path.display(), e)),
            }
        }
        let symbols = Symbols::resolve(&library)?;
        let bundle = Arc::new(Bundle { symbols, _companions: companions, _library: library });
        // SAFETY: symbol resolved above; argument is a valid log level code.
        let code = unsafe { (bundle.symbols.initialize_logging)(log_level_code(LogLevel::Warn)) };
        if code != SNPE_SUCCESS {
            emit(LogLevel::Warn, &format!("SNPE logging init failed: {}", bundle.last_error()));
        }
        let platform = Self { bundle };
        emit(LogLevel::Info, &format!("SNPE library version {}", platform.version_string()));
        Ok(platform)
    }
}

impl Platform for NativePlatform {
    fn create_factory(&self) -> Arc<dyn RuntimeFactory> {
        Arc::new(NativeFactory { bundle: Arc::clone(&self.bundle) })
    }

    fn version_string(&self) -> String {
        let s = &self.bundle.symbols;
        // SAFETY: the version handle is owned here and deleted after copying its string.
        unsafe {
            let handle = (s.get_library_version)();
            if handle.is_null() {
                return "unknown".to_string();
            }
            let ptr = (s.version_to_string)(handle);
            let version = if ptr.is_null() {
                "unknown".to_string()
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            };
            (s.version_delete)(handle);
            version
        }
    }

    fn set_log_level(&self, level: LogLevel) -> Result<()> {
        // SAFETY: plain value argument.
        let code = unsafe { (self.bundle.symbols.set_log_level)(log_level_code(level)) };
        self.bundle.check(code, "Snpe_Util_SetLogLevel")
    }
}

struct NativeFactory {
    bundle: Arc<Bundle>,
}

impl RuntimeFactory for NativeFactory {
    fn is_runtime_available(&self, accelerator: Accelerator) -> bool {
        // SAFETY: plain value argument.
        unsafe { (self.bundle.symbols.is_runtime_available)(runtime_code(accelerator)) != 0 }
    }

    fn build_executor(
        &self,
        network: &NetworkContainer,
        accelerator: Accelerator,
        options: &BuildOptions,
    ) -> Result<Box<dyn Executor>> {
        let b = &self.bundle;
        let s = &b.symbols;
        let payload = network.payload();
        let output_names = options
            .output_tensor_names
            .iter()
            .map(|name| {
                CString::new(name.as_str())
                    .map_err(|_| RuntimeError::invalid_argument("tensor name contains NUL").with_tensor(name))
            })
            .collect::<Result<Vec<_>>>()?;
        let adaptive = CString::new("useAdaptivePD:ON").unwrap_or_default();
        let init_failed =
            |e: RuntimeError| RuntimeError::executor_failure(format!("{} init failed: {}", accelerator, e.message));
        // SAFETY: handles are null-checked on creation and deleted by their
        // guards in reverse order; the payload outlives OpenBuffer, which copies it.
        unsafe {
            let container = Owned::new(
                (s.container_open_buffer)(payload.as_ptr(), payload.len()),
                s.container_delete,
            )
            .ok_or_else(|| {
                RuntimeError::invalid_format(format!("SNPE rejected the container: {}", b.last_error()))
            })?;
            let builder = b
                .own((s.builder_create)(container.handle), s.builder_delete, "Snpe_SNPEBuilder_Create")
                .map_err(init_failed)?;
            let runtimes = b
                .own((s.runtime_list_create)(), s.runtime_list_delete, "Snpe_RuntimeList_Create")
                .map_err(init_failed)?;
            b.check((s.runtime_list_add)(runtimes.handle, runtime_code(accelerator)), "Snpe_RuntimeList_Add")?;
            b.check(
                (s.builder_set_runtime_order)(builder.handle, runtimes.handle),
                "Snpe_SNPEBuilder_SetRuntimeProcessorOrder",
            )?;
            (s.builder_set_profile)(builder.handle, profile_code(options.performance_profile));
            (s.builder_set_priority)(builder.handle, priority_code(options.execution_priority));
            (s.builder_set_user_buffers)(builder.handle, c_int::from(options.use_user_buffers));
            (s.builder_set_init_cache)(builder.handle, c_int::from(options.init_cache));

            let outputs = b
                .own((s.string_list_create)(), s.string_list_delete, "Snpe_StringList_Create")
                .map_err(init_failed)?;
            for name in &output_names {
                (s.string_list_append)(outputs.handle, name.as_ptr());
            }
            if !output_names.is_empty() {
                (s.builder_set_outputs)(builder.handle, outputs.handle);
            }

            let platform_config = b
                .own((s.platform_config_create)(), s.platform_config_delete, "Snpe_PlatformConfig_Create")
                .map_err(init_failed)?;
            if matches!(accelerator, Accelerator::Dsp | Accelerator::Htp) {
                (s.platform_config_set_options)(platform_config.handle, adaptive.as_ptr());
                (s.builder_set_platform_config)(builder.handle, platform_config.handle);
            }

            let snpe = (s.builder_build)(builder.handle);
            if snpe.is_null() {
                return Err(RuntimeError::executor_failure(format!(
                    "{} build failed: {}",
                    accelerator,
                    b.last_error()
                )));
            }
            Ok(Box::new(NativeExecutor { bundle: Arc::clone(&self.bundle), snpe, accelerator }))
        }
    }
}

struct NativeExecutor {
    bundle: Arc<Bundle>,
    snpe: Handle,
    accelerator: Accelerator,
}

// SAFETY: an SNPE instance is used by one thread at a time; the session
// that owns the executor is behind a mutex.
unsafe impl Send for NativeExecutor {}

impl NativeExecutor {
    unsafe fn create_tensor(&self, dims: &[usize]) -> Result<Owned> {
        let b = &self.bundle;
        let s = &b.symbols;
        let shape =
            b.own((s.shape_create)(dims.as_ptr(), dims.len()), s.shape_delete, "Snpe_TensorShape_CreateDimsSize")?;
        b.own((s.create_itensor)(shape.handle), s.itensor_delete, "Snpe_Util_CreateITensor")
    }

    unsafe fn tensor_data(&self, tensor: &Owned, name: &str) -> Result<*mut c_void> {
        let data = (self.bundle.symbols.itensor_data)(tensor.handle);
        if data.is_null() {
            return Err(RuntimeError::executor_failure("ITensor has no data").with_tensor(name));
        }
        Ok(data)
    }
}

impl Executor for NativeExecutor {
    fn accelerator(&self) -> Accelerator {
        self.accelerator
    }

    fn execute(&mut self, inputs: &[TensorView<'_>], outputs: &mut [TensorViewMut<'_>]) -> Result<()> {
        let b = &self.bundle;
        let s = &b.symbols;
        // SAFETY: tensors are created with the descriptor's element count and
        // written within bounds. Maps are declared after the tensors they
        // reference so they are deleted first.
        unsafe {
            let mut owned = Vec::with_capacity(inputs.len());
            let input_map = b.own((s.tensor_map_create)(), s.tensor_map_delete, "Snpe_TensorMap_Create")?;
            let output_map = b.own((s.tensor_map_create)(), s.tensor_map_delete, "Snpe_TensorMap_Create")?;
            let mut names = Vec::with_capacity(inputs.len() + outputs.len());

            for view in inputs {
                let tensor = self.create_tensor(&view.descriptor.dims)?;
                let values = convert::decode_to_f32(view.descriptor.encoding, view.data);
                let len = (s.itensor_size)(tensor.handle).min(values.len());
                let dst = self.tensor_data(&tensor, &view.descriptor.name)? as *mut f32;
                std::ptr::copy_nonoverlapping(values.as_ptr(), dst, len);
                let name = CString::new(view.descriptor.name.as_str())
                    .map_err(|_| RuntimeError::invalid_argument("tensor name contains NUL"))?;
                (s.tensor_map_add)(input_map.handle, name.as_ptr(), tensor.handle);
                names.push(name);
                owned.push(tensor);
            }

            let code = (s.snpe_execute)(self.snpe, input_map.handle, output_map.handle);
            b.check(code, "Snpe_SNPE_ExecuteITensors")?;

            for view in outputs.iter_mut() {
                let name = CString::new(view.descriptor.name.as_str())
                    .map_err(|_| RuntimeError::invalid_argument("tensor name contains NUL"))?;
                let tensor = (s.tensor_map_get)(output_map.handle, name.as_ptr());
                if tensor.is_null() {
                    return Err(RuntimeError::executor_failure("output tensor missing after execute")
                        .with_tensor(&view.descriptor.name));
                }
                let len = (s.itensor_size)(tensor).min(view.descriptor.element_count());
                let src = (s.itensor_data)(tensor) as *const f32;
                if src.is_null() {
                    return Err(RuntimeError::executor_failure("ITensor has no data").with_tensor(&view.descriptor.name));
                }
                let values = std::slice::from_raw_parts(src, len);
                convert::encode_from_f32(view.descriptor.encoding, values, view.data);
                names.push(name);
            }
            Ok(())
        }
    }
}

impl Drop for NativeExecutor {
    fn drop(&mut self) {
        // SAFETY: the handle was produced by Snpe_SNPEBuilder_Build and is dropped once.
        unsafe {
            (self.bundle.symbols.snpe_delete)(self.snpe);
        }
    }
}
