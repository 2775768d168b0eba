pub mod bounds;
pub mod cache;
pub mod descriptor;
pub mod input;
pub mod material;
pub mod mesh;
pub mod state;
pub mod texture;

pub use bounds::{BoundingBox, BoundingSphere};
pub use cache::{Resource, ResourceCache, ResourceHeader, ResourceLoader};
pub use descriptor::{ResourceDescriptor, ResourceFlags};
pub use material::{AlphaMode, Material, ShadingData, TextureSlot};
pub use mesh::Mesh;
pub use state::{ResourceState, StateTracker};
pub use texture::{PixelFormat, SamplerDescriptor, Texture, TextureDescriptor, TextureType};
