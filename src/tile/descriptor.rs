//! DZI descriptor XML.

use super::pyramid::DziInfo;

/// The DZI info of a slide with its rendered descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DziDescriptor {
    pub info: DziInfo,
    pub xml: String,
}

impl DziDescriptor {
    pub fn new(info: DziInfo) -> Self {
        let xml = dzi_xml(&info);
        Self { info, xml }
    }
}

/// Render the Deep Zoom 2008 descriptor.
///
/// Line breaks, indentation and attribute order are fixed. No trailing newline.
pub fn dzi_xml(info: &DziInfo) -> String {
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<Image xmlns=\"http://schemas.microsoft.com/deepzoom/2008\"\n",
            "       TileSize=\"{}\"\n",
            "       Overlap=\"{}\"\n",
            "       Format=\"jpeg\"\n",
            "       ServerFormat=\"Default\">\n",
            "  <Size Width=\"{}\" Height=\"{}\"/>\n",
            "</Image>"
        ),
        info.tile_size, info.overlap, info.width, info.height
    )
}
