//! Small roxmltree helpers shared by the XML parsers.

use roxmltree::Node;

pub(crate) fn attr<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attribute(name).map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) fn flag(node: Node<'_, '_>, name: &str) -> bool {
    matches!(
        node.attribute(name).map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes" | "on")
    )
}

pub(crate) fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

pub(crate) fn child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    elements(node).find(|n| n.has_tag_name(tag))
}

/// Raw source text of an element, for fragments.
pub(crate) fn text_of<'t>(input: &'t str, node: Node<'_, '_>) -> &'t str {
    input.get(node.range()).unwrap_or_default()
}
