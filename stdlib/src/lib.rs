//! Native function library for BCVM programs.
//!
//! Each module declares one static library class whose functions are host natives. Scripts reach
//! them through `CallMath` (run on the library's class default object) or through regular final
//! calls.

pub mod array;
pub mod math;
pub mod string;
pub mod system;


use anyhow::{Result, bail};
use bcvm_core::{
    val::{ClassId, FunctionId, PropertyKind, Value},
    vm::{FUNC_NATIVE, FUNC_STATIC, NativeFn, ProgramBuilder},
};
use tracing::debug;

/// How a library function receives one of its parameters.
#[derive(Debug, Clone)]
pub enum Param {
    In(&'static str, PropertyKind),
    Out(&'static str, PropertyKind),
    /// Read and written by the native.
    Ref(&'static str, PropertyKind),
}

/// A registered library class and its functions by name.
#[derive(Debug, Clone)]
pub struct Library {
    pub class: ClassId,
    functions: Vec<(&'static str, FunctionId)>,
}

impl Library {
    pub fn get(&self, name: &str) -> Option<FunctionId> {
        self.functions.iter().find(|(n, _)| *n == name).map(|(_, id)| *id)
    }

    pub fn functions(&self) -> impl Iterator<Item = (&'static str, FunctionId)> + '_ {
        self.functions.iter().copied()
    }
}

pub(crate) struct LibraryBuilder<'a> {
    pb: &'a mut ProgramBuilder,
    library: Library,
}

impl<'a> LibraryBuilder<'a> {
    pub(crate) fn new(pb: &'a mut ProgramBuilder, class_name: &str) -> Result<Self> {
        if pb.has_class(class_name) {
            bail!("library class {class_name} is already registered");
        }
        let class = pb.add_class(class_name, None);
        Ok(Self {
            pb,
            library: Library {
                class,
                functions: Vec::new(),
            },
        })
    }

    pub(crate) fn declare(
        &mut self,
        name: &'static str,
        native: NativeFn,
        params: &[Param],
        ret: Option<PropertyKind>,
    ) -> &mut Self {
        let f = self.pb.add_function(self.library.class, name, FUNC_NATIVE | FUNC_STATIC);
        for param in params {
            match param {
                Param::In(n, kind) => {
                    self.pb.add_param(f, n, kind.clone());
                }
                Param::Out(n, kind) => {
                    self.pb.add_out_param(f, n, kind.clone(), false);
                }
                Param::Ref(n, kind) => {
                    self.pb.add_out_param(f, n, kind.clone(), true);
                }
            }
        }
        if let Some(kind) = ret {
            self.pb.add_return(f, kind);
        }
        self.pb.set_native(f, native);
        self.library.functions.push((name, f));
        self
    }

    pub(crate) fn finish(self) -> Library {
        debug!(
            target: "bcvm::stdlib",
            class = self.library.class.0,
            functions = self.library.functions.len(),
            "library registered"
        );
        self.library
    }
}

/// Ids of every library function registered by [`register`].
#[derive(Debug, Clone)]
pub struct StdlibIndex {
    pub math: Library,
    pub string: Library,
    pub array: Library,
    pub system: Library,
}

impl StdlibIndex {
    /// Finds a library function by name across all libraries.
    pub fn lookup(&self, name: &str) -> Option<FunctionId> {
        [&self.math, &self.string, &self.array, &self.system]
            .into_iter()
            .find_map(|lib| lib.get(name))
    }
}

/// Declares the library classes and their natives in `pb`.
pub fn register(pb: &mut ProgramBuilder) -> Result<StdlibIndex> {
    Ok(StdlibIndex {
        math: math::register(pb)?,
        string: string::register(pb)?,
        array: array::register(pb)?,
        system: system::register(pb)?,
    })
}

#[inline]
pub(crate) fn set_result(result: Option<&mut Value>, value: Value) {
    if let Some(result) = result {
        *result = value;
    }
}
