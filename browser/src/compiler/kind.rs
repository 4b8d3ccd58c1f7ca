use crate::model::NodeKind;
use crate::model::Region;

/// Map an AX role onto the closed node-kind enum. `None` means the role is
/// structural: it contributes region context but no snapshot node.
pub(super) fn kind_for_role(role: &str) -> Option<NodeKind> {
    let kind = match role {
        "button" => NodeKind::Button,
        "link" => NodeKind::Link,
        "textbox" | "searchbox" => NodeKind::Input,
        "combobox" | "listbox" => NodeKind::Combobox,
        "checkbox" => NodeKind::Checkbox,
        "radio" => NodeKind::Radio,
        "switch" => NodeKind::Switch,
        "slider" => NodeKind::Slider,
        "tab" => NodeKind::Tab,
        "menuitem" | "menuitemcheckbox" | "menuitemradio" => NodeKind::Menuitem,
        "heading" => NodeKind::Heading,
        "paragraph" => NodeKind::Paragraph,
        "StaticText" => NodeKind::Text,
        "dialog" | "alertdialog" => NodeKind::Dialog,
        "image" | "img" => NodeKind::Image,
        "list" => NodeKind::List,
        "listitem" => NodeKind::Listitem,
        "table" => NodeKind::Table,
        "navigation" => NodeKind::Navigation,
        "form" => NodeKind::Form,
        "region" | "group" => NodeKind::Section,
        // Landmark containers carry placement, not content.
        "banner" | "main" | "complementary" | "contentinfo" | "search"
        | "RootWebArea" | "WebArea" | "none" | "presentation" | "generic"
        | "LineBreak" | "InlineTextBox" => return None,
        _ => NodeKind::Generic,
    };
    Some(kind)
}

/// Region hint contributed by an AX landmark role.
pub(super) fn region_for_role(role: &str) -> Option<Region> {
    match role {
        "banner" => Some(Region::Header),
        "navigation" => Some(Region::Nav),
        "main" => Some(Region::Main),
        "complementary" => Some(Region::Aside),
        "contentinfo" => Some(Region::Footer),
        "search" => Some(Region::Search),
        "dialog" | "alertdialog" => Some(Region::Dialog),
        "form" => Some(Region::Form),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn interactive_roles_map_to_kinds() {
        assert_eq!(kind_for_role("button"), Some(NodeKind::Button));
        assert_eq!(kind_for_role("searchbox"), Some(NodeKind::Input));
        assert_eq!(kind_for_role("menuitemradio"), Some(NodeKind::Menuitem));
        assert_eq!(kind_for_role("alertdialog"), Some(NodeKind::Dialog));
    }

    #[test]
    fn landmarks_are_region_only() {
        assert_eq!(kind_for_role("banner"), None);
        assert_eq!(kind_for_role("contentinfo"), None);
        assert_eq!(region_for_role("banner"), Some(Region::Header));
        assert_eq!(region_for_role("complementary"), Some(Region::Aside));
    }

    #[test]
    fn unknown_roles_fall_back_to_generic() {
        assert_eq!(kind_for_role("feed"), Some(NodeKind::Generic));
        assert_eq!(region_for_role("feed"), None);
    }
}
