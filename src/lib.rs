mod advect;
mod boundary;
mod cg;
mod collider;
mod deriv;
mod field;
mod grid;
mod jacobi;
mod linsys;
mod mac;
mod multigrid;
mod reinit;
mod sim;
mod vec2;

pub use advect::{AdvectionScheme, Sampling, SemiLagrangian2};
pub use boundary::{
    fraction_inside, BoundaryConditionSolver2, BoundaryPolicy, DomainBoundaries, DomainEdge,
};
pub use cg::{pcg, CgSolver2, DiagonalPreconditioner2, NullPreconditioner, Preconditioner};
pub use collider::{Collider2, ColliderMotion, Surface2};
pub use deriv::{
    cd2, eno3, eno3_biased, upwind1, upwind1_biased, weno5, weno5_biased, WENO_EPSILON,
};
pub use field::Field2;
pub use grid::Grid2;
pub use jacobi::JacobiSolver2;
pub use linsys::{
    assemble_pressure_system, Blas, CompressedBlas, CompressedMatrix, CompressedSystem,
    LinearSolver2, LinearSystem2, StencilBlas2, StencilMatrix2, StencilRow,
};
pub use mac::{CellFlags, CellType, MacGrid2, MacVelocity2, StaggeredField2, StaggeredGrid2};
pub use multigrid::{MgLinearSystem2, MgSolver2};
pub use reinit::reinitialize;
pub use sim::{Emitter2, FluidSim2, Frame, PressureSolverKind, SimConfig};
pub use vec2::Vec2;
