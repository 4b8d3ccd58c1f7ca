use std::collections::HashMap;

use crate::extractor::RawDomNode;
use crate::model::Region;

fn region_for_tag(tag: &str) -> Option<Region> {
    match tag {
        "header" => Some(Region::Header),
        "nav" => Some(Region::Nav),
        "main" => Some(Region::Main),
        "aside" => Some(Region::Aside),
        "footer" => Some(Region::Footer),
        "form" => Some(Region::Form),
        "dialog" => Some(Region::Dialog),
        _ => None,
    }
}

fn region_for_role_attr(role: &str) -> Option<Region> {
    match role {
        "banner" => Some(Region::Header),
        "navigation" => Some(Region::Nav),
        "main" => Some(Region::Main),
        "complementary" => Some(Region::Aside),
        "contentinfo" => Some(Region::Footer),
        "form" => Some(Region::Form),
        "dialog" | "alertdialog" => Some(Region::Dialog),
        "search" => Some(Region::Search),
        _ => None,
    }
}

/// Walk DOM ancestors (starting at the node itself) until a landmark tag or
/// an AX landmark is found; innermost wins, and the AX hint trumps a DOM
/// `role` attribute at the same element.
pub(super) fn resolve_region(
    backend_node_id: u64,
    dom: &HashMap<u64, RawDomNode>,
    ax_regions: &HashMap<u64, Region>,
) -> Region {
    let mut cursor = Some(backend_node_id);
    let mut hops = 0usize;
    while let Some(current) = cursor {
        if let Some(region) = ax_regions.get(&current) {
            return *region;
        }
        let Some(node) = dom.get(&current) else {
            break;
        };
        if let Some(region) = region_for_tag(&node.tag()) {
            return region;
        }
        if let Some(region) = node.attr("role").and_then(region_for_role_attr) {
            return region;
        }
        cursor = node.parent_backend_id;
        hops += 1;
        if hops > dom.len() {
            // Defanged parent cycle in malformed input.
            break;
        }
    }
    Region::Unknown
}
