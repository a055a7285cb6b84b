//! Namespace-tolerant access to KML trees.
//! KML in the wild shows up under several namespace URIs (OGC 2.2, the old Google 2.1/2.2)
//! or with no namespace at all. Every lookup goes through `KmlAccessor`, which tries each
//! configured namespace in order and then falls back to unqualified element names, so the
//! extractor never has to care which variant it was handed.
//!
//! Paths use `/` between steps. A leading `.//` makes the first step a descendant search,
//! otherwise each step only looks at direct children (`Icon/href`, `.//Placemark`).

use roxmltree::{Document, Node, ParsingOptions};

pub fn parse_document(text: &str) -> Result<Document<'_>, roxmltree::Error> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Document::parse_with_options(text, options)
}

/// Trimmed text content of an element; `None` when missing or blank.
pub fn node_text<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    node.text().map(str::trim).filter(|t| !t.is_empty())
}

struct PathSpec<'p> {
    descendant: bool,
    steps: Vec<&'p str>,
}

impl<'p> PathSpec<'p> {
    fn parse(path: &'p str) -> Self {
        let (descendant, rest) = match path.strip_prefix(".//") {
            Some(rest) => (true, rest),
            None => (false, path),
        };
        let steps = rest.split('/').filter(|s| !s.is_empty()).collect();
        Self { descendant, steps }
    }
}

#[derive(Clone, Debug)]
pub struct KmlAccessor {
    namespaces: Vec<String>,
}

impl KmlAccessor {
    pub fn new(namespaces: Vec<String>) -> Self {
        Self { namespaces }
    }

    /// First element matching `path` under the first candidate namespace that matches anything.
    pub fn find<'a, 'i>(&self, node: Node<'a, 'i>, path: &str) -> Option<Node<'a, 'i>> {
        self.find_all(node, path).into_iter().next()
    }

    /// All elements matching `path`, in document order, for the first candidate that matches.
    pub fn find_all<'a, 'i>(&self, node: Node<'a, 'i>, path: &str) -> Vec<Node<'a, 'i>> {
        let query = PathSpec::parse(path);
        self.candidates()
            .map(|ns| select(node, &query, ns))
            .find(|found| !found.is_empty())
            .unwrap_or_default()
    }

    pub fn find_text<'a>(&self, node: Node<'a, '_>, path: &str) -> Option<&'a str> {
        self.find(node, path).and_then(node_text)
    }

    /// Text of the first path in `paths` that yields non-blank text.
    pub fn find_text_any<'a>(&self, node: Node<'a, '_>, paths: &[&str]) -> Option<&'a str> {
        paths.iter().find_map(|path| self.find_text(node, path))
    }

    fn candidates(&self) -> impl Iterator<Item = Option<&str>> {
        self.namespaces
            .iter()
            .map(|ns| Some(ns.as_str()))
            .chain(std::iter::once(None))
    }
}

fn is_named(node: &Node, name: &str, ns: Option<&str>) -> bool {
    node.is_element() && node.tag_name().name() == name && node.tag_name().namespace() == ns
}

fn select<'a, 'i>(node: Node<'a, 'i>, query: &PathSpec, ns: Option<&str>) -> Vec<Node<'a, 'i>> {
    let Some((first, rest)) = query.steps.split_first() else {
        return Vec::new();
    };

    let mut current: Vec<Node<'a, 'i>> = if query.descendant {
        node.descendants()
            .filter(|n| n.id() != node.id() && is_named(n, first, ns))
            .collect()
    } else {
        node.children().filter(|n| is_named(n, first, ns)).collect()
    };

    for step in rest {
        current = current
            .iter()
            .flat_map(|n| n.children().filter(|c| is_named(c, step, ns)))
            .collect();
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accessor() -> KmlAccessor {
        KmlAccessor::new(vec![
            "http://www.opengis.net/kml/2.2".to_string(),
            "http://earth.google.com/kml/2.2".to_string(),
        ])
    }

    #[test]
    fn test_finds_under_google_namespace() {
        let xml = r#"<kml xmlns="http://earth.google.com/kml/2.2">
            <Document><Placemark><name> BERA </name></Placemark></Document></kml>"#;
        let doc = parse_document(xml).unwrap();
        let placemark = accessor().find(doc.root(), ".//Placemark").unwrap();
        assert_eq!(accessor().find_text(placemark, "name"), Some("BERA"));
    }

    #[test]
    fn test_falls_back_to_unqualified_names() {
        let xml = "<kml><Document><Placemark><Point><coordinates>1,2</coordinates></Point></Placemark></Document></kml>";
        let doc = parse_document(xml).unwrap();
        let text = accessor().find_text(doc.root(), ".//Placemark/Point/coordinates");
        assert_eq!(text, Some("1,2"));
    }

    #[test]
    fn test_unknown_namespace_is_not_matched() {
        let xml = r#"<kml xmlns="urn:other"><Placemark/></kml>"#;
        let doc = parse_document(xml).unwrap();
        assert!(accessor().find(doc.root(), ".//Placemark").is_none());

        let custom = KmlAccessor::new(vec!["urn:other".to_string()]);
        assert!(custom.find(doc.root(), ".//Placemark").is_some());
    }

    #[test]
    fn test_child_steps_do_not_descend() {
        let xml = "<GroundOverlay><Folder><Icon><href>a.png</href></Icon></Folder></GroundOverlay>";
        let doc = parse_document(xml).unwrap();
        let overlay = doc.root_element();
        assert!(accessor().find(overlay, "Icon/href").is_none());
        assert!(accessor().find(overlay, ".//Icon/href").is_some());
    }

    #[test]
    fn test_find_all_keeps_document_order() {
        let xml = r#"<kml xmlns="http://www.opengis.net/kml/2.2"><Folder>
            <GroundOverlay><name>a</name></GroundOverlay>
            <GroundOverlay><name>b</name></GroundOverlay>
            <Folder><GroundOverlay><name>c</name></GroundOverlay></Folder>
            </Folder></kml>"#;
        let doc = parse_document(xml).unwrap();
        let acc = accessor();
        let names: Vec<_> = acc
            .find_all(doc.root(), ".//GroundOverlay")
            .into_iter()
            .filter_map(|n| acc.find_text(n, "name"))
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_find_text_any_skips_blank_candidates() {
        let xml = "<Document><name>  </name><n>Legacy</n></Document>";
        let doc = parse_document(xml).unwrap();
        let text = accessor().find_text_any(doc.root_element(), &["name", "n"]);
        assert_eq!(text, Some("Legacy"));
    }

    #[test]
    fn test_missing_path_is_none_not_error() {
        let doc = parse_document("<kml/>").unwrap();
        assert!(accessor().find_text(doc.root(), ".//Document/name").is_none());
        assert!(accessor().find_all(doc.root(), ".//GroundOverlay").is_empty());
        assert!(accessor().find(doc.root(), "").is_none());
    }
}
