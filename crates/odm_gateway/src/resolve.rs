use crate::error::ExtractError;

/// Every entry format the extraction pipeline knows how to serve. All
/// extension branching goes through this union; call sites match on the
/// variant instead of inspecting path suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Obj,
    Mtl,
    Ply,
    Glb,
    Png,
    Jpg,
    Las,
    Laz,
    Tif,
}

impl ArtifactFormat {
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
        Some(match ext.as_str() {
            "obj" => Self::Obj,
            "mtl" => Self::Mtl,
            "ply" => Self::Ply,
            "glb" => Self::Glb,
            "png" => Self::Png,
            "jpg" | "jpeg" => Self::Jpg,
            "las" => Self::Las,
            "laz" => Self::Laz,
            "tif" | "tiff" => Self::Tif,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Obj => "obj",
            Self::Mtl => "mtl",
            Self::Ply => "ply",
            Self::Glb => "glb",
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Las => "las",
            Self::Laz => "laz",
            Self::Tif => "tif",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Obj => "model/obj",
            Self::Mtl => "model/mtl",
            Self::Ply => "application/octet-stream",
            Self::Glb => "model/gltf-binary",
            Self::Png => "image/png",
            Self::Jpg => "image/jpeg",
            Self::Las | Self::Laz => "application/octet-stream",
            Self::Tif => "image/tiff",
        }
    }
}

/// The known locations of each artifact inside a result bundle, in the
/// order they are tried. First existing entry wins.
pub const ORTHOMOSAIC_CANDIDATES: &[&str] = &[
    "odm_orthophoto/odm_orthophoto.png",
    "odm_orthophoto/odm_orthophoto.tif",
    "odm_orthophoto/odm_orthophoto.jpg",
];

pub const POINTCLOUD_CANDIDATES: &[&str] = &[
    "odm_georeferencing/odm_georeferenced_model.laz",
    "odm_georeferencing/odm_georeferenced_model.las",
];

pub const MESH_CANDIDATES: &[&str] = &[
    "odm_texturing/odm_textured_model_geo.obj",
    "odm_texturing/odm_textured_model.obj",
    "odm_texturing/odm_textured_model_geo.glb",
    "odm_meshing/odm_mesh.ply",
];

pub const TEXTURE_CANDIDATES: &[&str] = &[
    "odm_texturing/odm_textured_model_geo_material0000_map_Kd.png",
    "odm_texturing/odm_textured_model_geo_material0000_map_Kd.jpg",
    "odm_texturing/odm_textured_model_material0000_map_Kd.png",
    "odm_texturing/odm_textured_model_material0000_map_Kd.jpg",
];

pub const MTL_CANDIDATES: &[&str] = &[
    "odm_texturing/odm_textured_model_geo.mtl",
    "odm_texturing/odm_textured_model.mtl",
];

/// Pick the first candidate that exists among `entry_names`, comparing
/// whole paths, no wildcards. On exhaustion, the error lists every
/// candidate tried plus present entries containing one of the artifact's
/// domain `keywords` as a diagnostic hint.
pub fn resolve<'a>(
    entry_names: &'a [String],
    candidates: &[&str],
    keywords: &[&str],
) -> Result<&'a str, ExtractError> {
    for candidate in candidates {
        if let Some(found) = entry_names.iter().find(|name| name.as_str() == *candidate) {
            return Ok(found.as_str());
        }
    }

    let nearby = entry_names
        .iter()
        .filter(|name| {
            let lower = name.to_ascii_lowercase();
            keywords.iter().any(|k| lower.contains(k))
        })
        .cloned()
        .collect();

    Err(ExtractError::NotFound {
        tried: candidates.iter().map(|c| c.to_string()).collect(),
        nearby,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn first_match_wins_in_declared_order() {
        let entries = names(&["b", "c"]);
        let got = resolve(&entries, &["a", "b", "c"], &[]).unwrap();
        assert_eq!(got, "b");
    }

    #[test]
    fn not_found_carries_tried_and_keyword_matches() {
        let entries = names(&["odm_orthophoto/odm_orthophoto_render.tif", "logs/task.txt"]);
        let err = resolve(&entries, ORTHOMOSAIC_CANDIDATES, &["ortho"]).unwrap_err();
        match err {
            ExtractError::NotFound { tried, nearby } => {
                assert_eq!(tried.len(), ORTHOMOSAIC_CANDIDATES.len());
                assert!(tried.contains(&"odm_orthophoto/odm_orthophoto.png".to_string()));
                assert_eq!(nearby, vec!["odm_orthophoto/odm_orthophoto_render.tif"]);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn no_wildcard_or_substring_matching() {
        let entries = names(&["prefix/odm_orthophoto/odm_orthophoto.tif"]);
        assert!(resolve(&entries, ORTHOMOSAIC_CANDIDATES, &[]).is_err());
    }

    #[test]
    fn format_from_path_handles_case_and_aliases() {
        assert_eq!(
            ArtifactFormat::from_path("a/b/model.OBJ"),
            Some(ArtifactFormat::Obj)
        );
        assert_eq!(
            ArtifactFormat::from_path("ortho.TIFF"),
            Some(ArtifactFormat::Tif)
        );
        assert_eq!(
            ArtifactFormat::from_path("tex.jpeg"),
            Some(ArtifactFormat::Jpg)
        );
        assert_eq!(ArtifactFormat::from_path("noext"), None);
    }
}
