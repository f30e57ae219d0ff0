use crate::archive::RemoteArchive;
use crate::error::ExtractError;
use crate::resolve::{
    self, ArtifactFormat, MESH_CANDIDATES, MTL_CANDIDATES, TEXTURE_CANDIDATES,
};

/// The three pieces a textured mesh bundle is served as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshPart {
    Mesh,
    Texture,
    Mtl,
}

impl MeshPart {
    pub fn from_query(value: &str) -> Option<Self> {
        match value {
            "mesh" => Some(Self::Mesh),
            "texture" => Some(Self::Texture),
            "mtl" => Some(Self::Mtl),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mesh => "mesh",
            Self::Texture => "texture",
            Self::Mtl => "mtl",
        }
    }

    pub fn candidates(&self) -> &'static [&'static str] {
        match self {
            Self::Mesh => MESH_CANDIDATES,
            Self::Texture => TEXTURE_CANDIDATES,
            Self::Mtl => MTL_CANDIDATES,
        }
    }

    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Mesh => &["mesh", "textur"],
            Self::Texture => &["map_kd", "textur"],
            Self::Mtl => &["mtl"],
        }
    }

    /// Extensions this part may be cached under, matching the candidate
    /// table order.
    pub fn cache_exts(&self) -> &'static [&'static str] {
        match self {
            Self::Mesh => &["obj", "glb", "ply"],
            Self::Texture => &["png", "jpg"],
            Self::Mtl => &["mtl"],
        }
    }
}

#[derive(Debug)]
pub struct MeshArtifact {
    pub bytes: Vec<u8>,
    pub format: ArtifactFormat,
}

/// Locate one mesh part inside the bundle and hand its bytes through
/// verbatim. No transcoding; only the format (and with it the content
/// type) is inferred from the matched extension.
pub fn extract(archive: &mut RemoteArchive, part: MeshPart) -> Result<MeshArtifact, ExtractError> {
    let names = archive.entry_names();
    let matched = resolve::resolve(&names, part.candidates(), part.keywords())?;
    let format = ArtifactFormat::from_path(matched)
        .ok_or_else(|| ExtractError::Unsupported(matched.to_string()))?;
    let matched = matched.to_string();
    let bytes = archive.read(&matched)?;
    Ok(MeshArtifact { bytes, format })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn bundle(entries: &[(&str, &[u8])]) -> RemoteArchive {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::default();
        for (name, bytes) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        RemoteArchive::from_bytes(writer.finish().unwrap().into_inner()).unwrap()
    }

    #[test]
    fn obj_is_preferred_over_ply() {
        let mut archive = bundle(&[
            ("odm_meshing/odm_mesh.ply", b"ply bytes"),
            ("odm_texturing/odm_textured_model_geo.obj", b"obj bytes"),
        ]);
        let artifact = extract(&mut archive, MeshPart::Mesh).unwrap();
        assert_eq!(artifact.format, ArtifactFormat::Obj);
        assert_eq!(artifact.bytes, b"obj bytes");
        assert_eq!(artifact.format.content_type(), "model/obj");
    }

    #[test]
    fn ply_fallback_when_no_textured_model() {
        let mut archive = bundle(&[("odm_meshing/odm_mesh.ply", b"ply bytes")]);
        let artifact = extract(&mut archive, MeshPart::Mesh).unwrap();
        assert_eq!(artifact.format, ArtifactFormat::Ply);
    }

    #[test]
    fn texture_tries_png_then_jpg() {
        let mut archive = bundle(&[(
            "odm_texturing/odm_textured_model_geo_material0000_map_Kd.jpg",
            b"jpg bytes",
        )]);
        let artifact = extract(&mut archive, MeshPart::Texture).unwrap();
        assert_eq!(artifact.format, ArtifactFormat::Jpg);
        assert_eq!(artifact.bytes, b"jpg bytes");
    }

    #[test]
    fn both_mtl_naming_conventions_resolve() {
        let mut archive = bundle(&[("odm_texturing/odm_textured_model.mtl", b"mtl bytes")]);
        let artifact = extract(&mut archive, MeshPart::Mtl).unwrap();
        assert_eq!(artifact.format, ArtifactFormat::Mtl);
    }

    #[test]
    fn missing_part_lists_candidates() {
        let mut archive = bundle(&[("odm_report/report.pdf", b"x")]);
        let err = extract(&mut archive, MeshPart::Mesh).unwrap_err();
        assert!(err
            .to_string()
            .contains("odm_texturing/odm_textured_model_geo.obj"));
    }
}
