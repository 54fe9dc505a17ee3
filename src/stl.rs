//! Binary STL serialization of triangulated meshes.
//!
//! Layout: 80-byte header, u32 little-endian face count, then one
//! 50-byte record per face (12-byte normal, three 12-byte vertices in
//! stored winding order, 2-byte attribute field written as zero).
//! The mesh's world transform is applied at encode time: positions by
//! the full matrix, normals by the rotational 3x3 only, re-normalized.
//! Degenerate faces are passed through unrepaired; geometry repair
//! belongs to the importer, not the encoder.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub const HEADER_LEN: usize = 80;
pub const FACET_RECORD_LEN: usize = 50;

pub type Transform = [[f32; 4]; 4];

pub fn identity_transform() -> Transform {
    [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Facet {
    pub normal: [f32; 3],
    pub vertices: [[f32; 3]; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriMesh {
    pub facets: Vec<Facet>,
    #[serde(default = "identity_transform")]
    pub transform: Transform,
}

impl TriMesh {
    pub fn with_identity(facets: Vec<Facet>) -> Self {
        Self {
            facets,
            transform: identity_transform(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + 4 + self.facets.len() * FACET_RECORD_LEN
    }
}

fn transform_point(m: &Transform, p: [f32; 3]) -> [f32; 3] {
    [
        m[0][0] * p[0] + m[0][1] * p[1] + m[0][2] * p[2] + m[0][3],
        m[1][0] * p[0] + m[1][1] * p[1] + m[1][2] * p[2] + m[1][3],
        m[2][0] * p[0] + m[2][1] * p[1] + m[2][2] * p[2] + m[2][3],
    ]
}

/// Rotational part only, then re-normalize. A zero-length result is
/// returned as-is; the encoder does not repair degenerate geometry.
fn transform_normal(m: &Transform, n: [f32; 3]) -> [f32; 3] {
    let t = [
        m[0][0] * n[0] + m[0][1] * n[1] + m[0][2] * n[2],
        m[1][0] * n[0] + m[1][1] * n[1] + m[1][2] * n[2],
        m[2][0] * n[0] + m[2][1] * n[1] + m[2][2] * n[2],
    ];
    let len = (t[0] * t[0] + t[1] * t[1] + t[2] * t[2]).sqrt();
    if len > 0.0 && len.is_finite() {
        [t[0] / len, t[1] / len, t[2] / len]
    } else {
        t
    }
}

/// Encode a mesh into an in-memory binary STL stream.
pub fn encode_stl(mesh: &TriMesh) -> Result<Vec<u8>, PipelineError> {
    if mesh.facets.is_empty() {
        return Err(PipelineError::EmptyMesh);
    }
    let count = u32::try_from(mesh.facets.len()).map_err(|_| {
        PipelineError::WriteError(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "face count exceeds u32",
        ))
    })?;

    let mut buf = BytesMut::with_capacity(mesh.encoded_len());
    let mut header = [0u8; HEADER_LEN];
    let tag = b"img3d-gateway binary stl";
    header[..tag.len()].copy_from_slice(tag);
    buf.put_slice(&header);
    buf.put_u32_le(count);

    for facet in &mesh.facets {
        let normal = transform_normal(&mesh.transform, facet.normal);
        for c in normal {
            buf.put_f32_le(c);
        }
        for vertex in facet.vertices {
            let p = transform_point(&mesh.transform, vertex);
            for c in p {
                buf.put_f32_le(c);
            }
        }
        buf.put_u16_le(0);
    }
    Ok(buf.to_vec())
}

/// Encode and fully flush a mesh into `writer`. Returns bytes written.
pub fn write_stl<W: Write>(mesh: &TriMesh, writer: &mut W) -> Result<u64, PipelineError> {
    let encoded = encode_stl(mesh)?;
    writer
        .write_all(&encoded)
        .and_then(|_| writer.flush())
        .map_err(PipelineError::WriteError)?;
    Ok(encoded.len() as u64)
}

/// Boundary to the external geometry-processing engine that turns a
/// source asset (GLB) into a triangulated mesh. Import and cleanup are
/// the engine's problem; this crate only encodes what it returns.
#[async_trait]
pub trait GeometryEngine: Send + Sync {
    async fn triangulate(&self, asset_path: &Path) -> Result<TriMesh, PipelineError>;
}

/// Runs a configured external command `<cmd> <input> <output.json>`
/// within a wait budget and parses the mesh document it writes.
pub struct CommandGeometryEngine {
    command: String,
    budget: Duration,
}

impl CommandGeometryEngine {
    pub fn new(command: String, budget: Duration) -> Self {
        Self { command, budget }
    }
}

#[async_trait]
impl GeometryEngine for CommandGeometryEngine {
    async fn triangulate(&self, asset_path: &Path) -> Result<TriMesh, PipelineError> {
        let out_path = asset_path.with_extension("mesh.json");
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg(asset_path)
            .arg(&out_path)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            // The child is killed when the timed-out wait drops it.
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(|e| PipelineError::RemoteTerminal {
            operation: "mesh_import".to_string(),
            message: format!("failed to spawn {}: {}", self.command, e),
        })?;
        let waited = tokio::time::timeout(self.budget, child.wait_with_output()).await;
        let output = match waited {
            Ok(result) => result.map_err(|e| PipelineError::RemoteTerminal {
                operation: "mesh_import".to_string(),
                message: format!("failed to run {}: {}", self.command, e),
            })?,
            Err(_) => {
                return Err(PipelineError::Timeout {
                    stage: "mesh_import".to_string(),
                    budget_secs: self.budget.as_secs(),
                });
            }
        };
        if !output.status.success() {
            return Err(PipelineError::RemoteTerminal {
                operation: "mesh_import".to_string(),
                message: format!(
                    "{} exited with {}: {}",
                    self.command,
                    output.status,
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }
        let raw = tokio::fs::read(&out_path)
            .await
            .map_err(|e| PipelineError::RemoteTerminal {
                operation: "mesh_import".to_string(),
                message: format!("mesh document missing: {}", e),
            })?;
        let _ = tokio::fs::remove_file(&out_path).await;
        serde_json::from_slice(&raw).map_err(|e| PipelineError::RemoteTerminal {
            operation: "mesh_import".to_string(),
            message: format!("invalid mesh document: {}", e),
        })
    }
}
