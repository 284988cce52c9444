use crate::dom::{DocumentAccessor, NodeId, class_list, descendants, find_by_id};

/// Locator segments are joined with this separator; a segment is either
/// `#id` or `tag[.class[.class]][:nth-of-type]`.
const SEPARATOR: &str = " > ";
const MAX_SEGMENT_CLASSES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Id(String),
    Path {
        tag: String,
        classes: Vec<String>,
        nth: Option<usize>,
    },
}

fn nth_of_type(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> Option<usize> {
    let parent = doc.parent(node)?;
    let tag = doc.tag(node);
    doc.children(parent)
        .iter()
        .filter(|&&sibling| doc.tag(sibling) == tag)
        .position(|&sibling| sibling == node)
        .map(|index| index + 1)
}

fn segment_for(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> Segment {
    if let Some(id) = doc.attr(node, "id").filter(|id| !id.trim().is_empty()) {
        return Segment::Id(id.trim().to_string());
    }
    Segment::Path {
        tag: doc.tag(node),
        classes: class_list(doc, node)
            .into_iter()
            .take(MAX_SEGMENT_CLASSES)
            .collect(),
        nth: nth_of_type(doc, node),
    }
}

/// Best-effort structural path to a node: id-anchored when an id exists
/// within the depth cap, positional otherwise. Not stable across document
/// mutation.
pub fn build_locator(
    doc: &(impl DocumentAccessor + ?Sized),
    node: NodeId,
    max_depth: usize,
) -> String {
    let mut segments = Vec::new();
    let mut current = Some(node);
    while let Some(active) = current {
        if segments.len() >= max_depth {
            break;
        }
        let segment = segment_for(doc, active);
        let is_anchor = matches!(segment, Segment::Id(_));
        segments.push(segment);
        if is_anchor {
            break;
        }
        current = doc.parent(active);
    }
    segments.reverse();
    segments
        .iter()
        .map(render_segment)
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

fn render_segment(segment: &Segment) -> String {
    match segment {
        Segment::Id(id) => format!("#{id}"),
        Segment::Path { tag, classes, nth } => {
            let mut out = tag.clone();
            for class in classes {
                out.push('.');
                out.push_str(class);
            }
            if let Some(nth) = nth {
                out.push_str(&format!(":{nth}"));
            }
            out
        }
    }
}

fn parse_segment(raw: &str) -> Segment {
    if let Some(id) = raw.strip_prefix('#') {
        return Segment::Id(id.to_string());
    }
    let (path, nth) = match raw.rsplit_once(':') {
        Some((path, nth)) => (path, nth.parse::<usize>().ok()),
        None => (raw, None),
    };
    let mut parts = path.split('.');
    let tag = parts.next().unwrap_or_default().to_string();
    Segment::Path {
        tag,
        classes: parts.map(str::to_string).collect(),
        nth,
    }
}

fn segment_matches(
    doc: &(impl DocumentAccessor + ?Sized),
    node: NodeId,
    segment: &Segment,
) -> bool {
    match segment {
        Segment::Id(id) => doc.attr(node, "id").as_deref() == Some(id.as_str()),
        Segment::Path { tag, classes, nth } => {
            if doc.tag(node) != *tag {
                return false;
            }
            let node_classes = class_list(doc, node);
            if !classes
                .iter()
                .all(|class| node_classes.iter().any(|have| have == class))
            {
                return false;
            }
            match nth {
                Some(nth) => nth_of_type(doc, node) == Some(*nth),
                None => true,
            }
        }
    }
}

fn descend(
    doc: &(impl DocumentAccessor + ?Sized),
    from: NodeId,
    segments: &[Segment],
) -> Option<NodeId> {
    let mut current = from;
    for segment in segments {
        current = doc
            .children(current)
            .into_iter()
            .find(|&child| segment_matches(doc, child, segment))?;
    }
    Some(current)
}

/// Re-resolves a locator in the same document. Returns `None` when the
/// path no longer leads anywhere.
pub fn resolve_locator(
    doc: &(impl DocumentAccessor + ?Sized),
    locator: &str,
) -> Option<NodeId> {
    let segments: Vec<Segment> = locator
        .split(SEPARATOR)
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(parse_segment)
        .collect();
    let (first, rest) = segments.split_first()?;

    if let Segment::Id(id) = first {
        let anchor = find_by_id(doc, id)?;
        return descend(doc, anchor, rest);
    }

    let root = doc.root();
    std::iter::once(root)
        .chain(descendants(doc, root))
        .filter(|&node| segment_matches(doc, node, first))
        .find_map(|anchor| descend(doc, anchor, rest))
}
