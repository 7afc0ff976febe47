//! Per-frame command graph: kernel invocations with their buffer read/write sets.
//!
//! Nodes execute in recording order. A [`Node::Barrier`] is an explicit
//! synchronization point; kernels that fence their inputs (the field merge)
//! must be separated from every producer of those inputs by one. Backends call
//! [`CommandGraph::validate`] before executing.

use std::fmt;

use crate::error::{OceanError, Result};
use crate::grid::{Axis, FieldFormat, GridSize};
use crate::spectrum::SpectrumSettings;
use crate::wave::{ComponentFields, OutputFields};

/// Opaque id of a backend-owned buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A 2D field allocated by a backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldHandle {
    pub id: ResourceId,
    pub grid: GridSize,
    pub format: FieldFormat,
}

impl FieldHandle {
    /// Number of f32 values backing the field
    pub fn value_count(&self) -> usize {
        self.grid.len() * self.format.channels()
    }
}

/// A `u32` lookup table allocated by a backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TableHandle {
    pub id: ResourceId,
    pub len: u32,
}

/// Sign of the twiddle exponent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Inverse,
}

impl Direction {
    /// -1 for `exp(-2πi..)` (forward), +1 for the inverse
    pub fn sign(self) -> f32 {
        match self {
            Direction::Forward => -1.0,
            Direction::Inverse => 1.0,
        }
    }
}

/// Kernel family, one compute pipeline each on the GPU
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelKind {
    BitReverse,
    Butterfly,
    Modulate,
    Scale,
    Copy,
    StaticSpectrum,
    Evolve,
    Merge,
}

/// One kernel invocation together with the fields it binds
#[derive(Clone, Debug)]
pub enum Kernel {
    /// Scatter `src` into `dst` along `axis` using the reversed-index table
    BitReverse {
        axis: Axis,
        src: FieldHandle,
        dst: FieldHandle,
        table: TableHandle,
    },
    /// One radix-2 pass along `axis`, reading `src` and writing `dst`
    Butterfly {
        axis: Axis,
        stage: u32,
        direction: Direction,
        src: FieldHandle,
        dst: FieldHandle,
    },
    /// In-place `(-1)^(x+y)` modulation (frequency centering)
    Modulate { target: FieldHandle },
    /// In-place multiply by `factor`
    Scale { target: FieldHandle, factor: f32 },
    /// Whole-buffer copy
    Copy { src: FieldHandle, dst: FieldHandle },
    StaticSpectrum {
        noise: FieldHandle,
        h0: FieldHandle,
        frequency: FieldHandle,
        settings: SpectrumSettings,
    },
    Evolve {
        h0: FieldHandle,
        frequency: FieldHandle,
        components: ComponentFields,
        time: f32,
    },
    Merge {
        components: ComponentFields,
        outputs: OutputFields,
        choppiness: f32,
    },
}

impl Kernel {
    pub fn kind(&self) -> KernelKind {
        match self {
            Kernel::BitReverse { .. } => KernelKind::BitReverse,
            Kernel::Butterfly { .. } => KernelKind::Butterfly,
            Kernel::Modulate { .. } => KernelKind::Modulate,
            Kernel::Scale { .. } => KernelKind::Scale,
            Kernel::Copy { .. } => KernelKind::Copy,
            Kernel::StaticSpectrum { .. } => KernelKind::StaticSpectrum,
            Kernel::Evolve { .. } => KernelKind::Evolve,
            Kernel::Merge { .. } => KernelKind::Merge,
        }
    }

    /// Grid the dispatch covers
    pub fn grid(&self) -> GridSize {
        match self {
            Kernel::BitReverse { dst, .. }
            | Kernel::Butterfly { dst, .. }
            | Kernel::Copy { dst, .. } => dst.grid,
            Kernel::Modulate { target } | Kernel::Scale { target, .. } => target.grid,
            Kernel::StaticSpectrum { h0, .. } => h0.grid,
            Kernel::Evolve { h0, .. } => h0.grid,
            Kernel::Merge { outputs, .. } => outputs.displacement.grid,
        }
    }

    /// Resources the kernel reads
    pub fn reads(&self) -> Vec<ResourceId> {
        match self {
            Kernel::BitReverse { src, table, .. } => vec![src.id, table.id],
            Kernel::Butterfly { src, .. } | Kernel::Copy { src, .. } => vec![src.id],
            Kernel::Modulate { target } | Kernel::Scale { target, .. } => vec![target.id],
            Kernel::StaticSpectrum { noise, .. } => vec![noise.id],
            Kernel::Evolve { h0, frequency, .. } => vec![h0.id, frequency.id],
            Kernel::Merge { components, .. } => components.ids().to_vec(),
        }
    }

    /// Resources the kernel writes
    pub fn writes(&self) -> Vec<ResourceId> {
        match self {
            Kernel::BitReverse { dst, .. }
            | Kernel::Butterfly { dst, .. }
            | Kernel::Copy { dst, .. } => vec![dst.id],
            Kernel::Modulate { target } | Kernel::Scale { target, .. } => vec![target.id],
            Kernel::StaticSpectrum { h0, frequency, .. } => vec![h0.id, frequency.id],
            Kernel::Evolve { components, .. } => components.ids().to_vec(),
            Kernel::Merge { outputs, .. } => outputs.ids().to_vec(),
        }
    }

    /// Kernels that gather from one buffer into another; source and destination must differ
    fn is_gather(&self) -> bool {
        matches!(
            self.kind(),
            KernelKind::BitReverse | KernelKind::Butterfly | KernelKind::Copy
        )
    }

    /// Kernels whose inputs must be fenced from their producers
    pub fn fences_inputs(&self) -> bool {
        self.kind() == KernelKind::Merge
    }

    /// Every bound field shares the dispatch grid and carries the format the kernel indexes it with
    pub fn check_layout(&self) -> Result<()> {
        let grid = self.grid();
        match self {
            Kernel::BitReverse {
                axis,
                src,
                dst,
                table,
            } => {
                expect(src, grid, FieldFormat::Rg)?;
                expect(dst, grid, FieldFormat::Rg)?;
                if table.len != grid.axis_len(*axis) {
                    return Err(OceanError::DataLength {
                        expected: grid.axis_len(*axis) as usize,
                        actual: table.len as usize,
                    });
                }
                Ok(())
            }
            Kernel::Butterfly { src, dst, .. } => {
                expect(src, grid, FieldFormat::Rg)?;
                expect(dst, grid, FieldFormat::Rg)
            }
            Kernel::Modulate { target } => expect(target, grid, FieldFormat::Rg),
            Kernel::Scale { .. } => Ok(()),
            Kernel::Copy { src, dst } => expect(src, grid, dst.format),
            Kernel::StaticSpectrum {
                noise,
                h0,
                frequency,
                ..
            } => {
                expect(noise, grid, FieldFormat::Rg)?;
                expect(h0, grid, FieldFormat::Rg)?;
                expect(frequency, grid, FieldFormat::Rgba)
            }
            Kernel::Evolve {
                h0,
                frequency,
                components,
                ..
            } => {
                expect(h0, grid, FieldFormat::Rg)?;
                expect(frequency, grid, FieldFormat::Rgba)?;
                components
                    .handles()
                    .iter()
                    .try_for_each(|c| expect(c, grid, FieldFormat::Rg))
            }
            Kernel::Merge {
                components,
                outputs,
                ..
            } => {
                components
                    .handles()
                    .iter()
                    .try_for_each(|c| expect(c, grid, FieldFormat::Rg))?;
                expect(&outputs.displacement, grid, FieldFormat::Rgba)?;
                expect(&outputs.derivatives, grid, FieldFormat::Rgba)?;
                expect(&outputs.turbulence, grid, FieldFormat::R)
            }
        }
    }
}

fn expect(field: &FieldHandle, grid: GridSize, format: FieldFormat) -> Result<()> {
    if field.grid != grid {
        return Err(OceanError::SizeMismatch {
            expected: grid,
            actual: field.grid,
        });
    }
    if field.format != format {
        return Err(OceanError::FormatMismatch {
            expected: format,
            actual: field.format,
        });
    }
    Ok(())
}

/// A node of the command graph
#[derive(Clone, Debug)]
pub enum Node {
    Dispatch(Kernel),
    Barrier(&'static str),
}

/// Dependency edge between two dispatch nodes (indices into [`CommandGraph::nodes`])
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dependency {
    pub from: usize,
    pub to: usize,
    pub resource: ResourceId,
}

/// Ordered list of kernel dispatches and barriers, submitted to a backend as one unit
#[derive(Clone, Debug)]
pub struct CommandGraph {
    label: &'static str,
    nodes: Vec<Node>,
}

impl CommandGraph {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            nodes: Vec::new(),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn dispatch(&mut self, kernel: Kernel) {
        self.nodes.push(Node::Dispatch(kernel));
    }

    pub fn barrier(&mut self, label: &'static str) {
        self.nodes.push(Node::Barrier(label));
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over dispatched kernels, skipping barriers
    pub fn kernels(&self) -> impl Iterator<Item = &Kernel> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Dispatch(kernel) => Some(kernel),
            Node::Barrier(_) => None,
        })
    }

    /// Read-after-write, write-after-read and write-after-write edges between dispatches
    pub fn dependencies(&self) -> Vec<Dependency> {
        let mut edges = Vec::new();
        for (to, later) in self.nodes.iter().enumerate() {
            let Node::Dispatch(later) = later else {
                continue;
            };
            let later_reads = later.reads();
            let later_writes = later.writes();
            for (from, earlier) in self.nodes[..to].iter().enumerate() {
                let Node::Dispatch(earlier) = earlier else {
                    continue;
                };
                let earlier_reads = earlier.reads();
                for resource in earlier.writes() {
                    if later_reads.contains(&resource) || later_writes.contains(&resource) {
                        edges.push(Dependency { from, to, resource });
                    }
                }
                for resource in earlier_reads {
                    if later_writes.contains(&resource) && !earlier.writes().contains(&resource) {
                        edges.push(Dependency { from, to, resource });
                    }
                }
            }
        }
        edges
    }

    /// Check field layouts, ping-pong aliasing and fence placement
    pub fn validate(&self) -> Result<()> {
        for (index, node) in self.nodes.iter().enumerate() {
            let Node::Dispatch(kernel) = node else {
                continue;
            };
            kernel.check_layout()?;

            if kernel.is_gather() {
                let reads = kernel.reads();
                if let Some(aliased) = kernel.writes().iter().find(|id| reads.contains(id)) {
                    return Err(OceanError::GraphHazard(format!(
                        "{:?} at node {} reads and writes {}",
                        kernel.kind(),
                        index,
                        aliased
                    )));
                }
            }

            if kernel.fences_inputs() {
                for resource in kernel.reads() {
                    self.check_fenced(index, resource, kernel.kind())?;
                }
            }
        }
        Ok(())
    }

    /// The last producer of `resource` before `consumer` must be followed by a barrier
    fn check_fenced(&self, consumer: usize, resource: ResourceId, kind: KernelKind) -> Result<()> {
        let mut fenced = false;
        for node in self.nodes[..consumer].iter().rev() {
            match node {
                Node::Barrier(_) => fenced = true,
                Node::Dispatch(kernel) if kernel.writes().contains(&resource) => {
                    return if fenced {
                        Ok(())
                    } else {
                        Err(OceanError::GraphHazard(format!(
                            "{:?} at node {} reads {} without a barrier after its last write",
                            kind, consumer, resource
                        )))
                    };
                }
                Node::Dispatch(_) => {}
            }
        }
        Ok(())
    }
}
