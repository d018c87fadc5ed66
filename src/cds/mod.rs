//! The ContentDirectory service: an in-memory hierarchy of shareable
//! folders and items.
//!
//! The hierarchy is partitioned under three fixed virtual folders (Music,
//! Photo, Video) so that items of different kinds do not get mixed up.
//! A user folder is *replicated*: one copy under each virtual folder, all
//! three sharing the same identity, because at creation time it is unknown
//! which kinds of items it will hold. An item lives in exactly one subtree,
//! chosen by its kind. Identities are 32-hex content digests and stay
//! stable across restarts, so control points can keep prior references.

pub mod actions;
pub mod didl;
pub mod scpd;

use std::sync::Arc;

use thiserror::Error;

use crate::media::{HashProvider, MediaKind, Resource};

/// Object identity: 32 lowercase hex digits.
pub type ObjectId = String;

/// Fixed identities for the hidden root and the three virtual folders.
pub const ROOT_ID: &str = "2673a016ad6e08603d7aea0e4fed596b";
pub const MUSIC_ID: &str = "e7d5184e4366142787fa4a153bcd3c6a";
pub const PHOTO_ID: &str = "9007afba8fdf31332b36c8e5afb440d1";
pub const VIDEO_ID: &str = "d97685b624d6c12778e7080e76b3fb3f";

const ROOT: usize = 0;
const MUSIC: usize = 1;
const PHOTO: usize = 2;
const VIDEO: usize = 3;
const FIXED_NODES: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("empty path or name")]
    EmptyArgument,
    #[error("parent {0} not reachable")]
    UnreachableParent(String),
}

#[derive(Debug)]
enum Payload {
    Folder {
        name: String,
        first_child: Option<usize>,
        last_child: Option<usize>,
        child_count: usize,
    },
    Item(Arc<Resource>),
}

#[derive(Debug)]
struct Node {
    id: ObjectId,
    parent: Option<usize>,
    prev: Option<usize>,
    next: Option<usize>,
    payload: Payload,
}

impl Node {
    fn folder(id: &str, name: &str, parent: Option<usize>) -> Self {
        Node {
            id: id.to_owned(),
            parent,
            prev: None,
            next: None,
            payload: Payload::Folder {
                name: name.to_owned(),
                first_child: None,
                last_child: None,
                child_count: 0,
            },
        }
    }

    fn is_folder(&self) -> bool {
        matches!(self.payload, Payload::Folder { .. })
    }
}

/// A read-only view of one tree object, as handed to the DIDL emitter and
/// the action handlers.
#[derive(Debug, Clone)]
pub enum ObjectView {
    Folder {
        id: ObjectId,
        parent_id: Option<ObjectId>,
        name: String,
        child_count: usize,
    },
    Item {
        id: ObjectId,
        parent_id: Option<ObjectId>,
        resource: Arc<Resource>,
    },
}

impl ObjectView {
    pub fn id(&self) -> &str {
        match self {
            ObjectView::Folder { id, .. } | ObjectView::Item { id, .. } => id,
        }
    }
}

/// The content tree. Arena-backed: nodes are addressed by index, sibling
/// order is a doubly linked chain with first/last cursors on the parent.
pub struct ContentTree {
    nodes: Vec<Node>,
    hasher: Arc<dyn HashProvider>,
}

impl ContentTree {
    pub fn new(hasher: Arc<dyn HashProvider>) -> Self {
        let mut nodes = Vec::with_capacity(64);
        nodes.push(Node::folder(ROOT_ID, "Root", None));
        nodes.push(Node::folder(MUSIC_ID, "Music", Some(ROOT)));
        nodes.push(Node::folder(PHOTO_ID, "Photo", Some(ROOT)));
        nodes.push(Node::folder(VIDEO_ID, "Video", Some(ROOT)));

        let mut tree = ContentTree { nodes, hasher };
        tree.link_tops();
        tree
    }

    fn link_tops(&mut self) {
        self.nodes[MUSIC].next = Some(PHOTO);
        self.nodes[PHOTO].prev = Some(MUSIC);
        self.nodes[PHOTO].next = Some(VIDEO);
        self.nodes[VIDEO].prev = Some(PHOTO);
        if let Payload::Folder {
            first_child,
            last_child,
            child_count,
            ..
        } = &mut self.nodes[ROOT].payload
        {
            *first_child = Some(MUSIC);
            *last_child = Some(VIDEO);
            *child_count = 3;
        }
    }

    pub fn root_id(&self) -> &str {
        ROOT_ID
    }

    /// The virtual top folder an item of this kind belongs under.
    fn top_for_kind(kind: MediaKind) -> usize {
        match kind {
            MediaKind::Audio => MUSIC,
            MediaKind::Photo => PHOTO,
            MediaKind::Video | MediaKind::AudioVideo => VIDEO,
        }
    }

    fn folder_fields(&self, idx: usize) -> (Option<usize>, Option<usize>, usize) {
        match &self.nodes[idx].payload {
            Payload::Folder {
                first_child,
                last_child,
                child_count,
                ..
            } => (*first_child, *last_child, *child_count),
            Payload::Item(_) => (None, None, 0),
        }
    }

    /// Append a node as the last child of `parent`, keeping the sibling
    /// chain and the parent's cursors consistent.
    fn append_child(&mut self, parent: usize, child: usize) {
        let (first, last, count) = self.folder_fields(parent);
        self.nodes[child].parent = Some(parent);
        self.nodes[child].prev = last;
        self.nodes[child].next = None;
        if let Some(last) = last {
            self.nodes[last].next = Some(child);
        }
        if let Payload::Folder {
            first_child,
            last_child,
            child_count,
            ..
        } = &mut self.nodes[parent].payload
        {
            *first_child = first.or(Some(child));
            *last_child = Some(child);
            *child_count = count + 1;
        }
    }

    /// Unlink a node from its parent's child chain. The node itself stays
    /// in the arena until the caller reclaims it.
    fn unlink(&mut self, idx: usize) {
        let (parent, prev, next) = {
            let n = &self.nodes[idx];
            (n.parent, n.prev, n.next)
        };
        if let Some(prev) = prev {
            self.nodes[prev].next = next;
        }
        if let Some(next) = next {
            self.nodes[next].prev = prev;
        }
        if let Some(parent) = parent {
            if let Payload::Folder {
                first_child,
                last_child,
                child_count,
                ..
            } = &mut self.nodes[parent].payload
            {
                if *first_child == Some(idx) {
                    *first_child = next;
                }
                if *last_child == Some(idx) {
                    *last_child = prev;
                }
                *child_count -= 1;
            }
        }
        let n = &mut self.nodes[idx];
        n.parent = None;
        n.prev = None;
        n.next = None;
    }

    /// Depth-first search for a folder id inside one subtree. Folders are
    /// replicated, so the subtree matters: adding a music item must find
    /// the folder copy in the music tree, not the photo tree.
    fn find_folder_in(&self, start: usize, id: &str) -> Option<usize> {
        if self.nodes[start].is_folder() && self.nodes[start].id == id {
            return Some(start);
        }
        let (mut child, _, _) = self.folder_fields(start);
        while let Some(c) = child {
            if self.nodes[c].is_folder() {
                if let Some(found) = self.find_folder_in(c, id) {
                    return Some(found);
                }
            }
            child = self.nodes[c].next;
        }
        None
    }

    /// Resolve any object id to its node. Replicated folders resolve to
    /// the copy in the first subtree (Music, then Photo, then Video), which
    /// matches a depth-first visit from the root.
    fn find(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    fn view(&self, idx: usize) -> ObjectView {
        let node = &self.nodes[idx];
        let parent_id = node.parent.map(|p| self.nodes[p].id.clone());
        match &node.payload {
            Payload::Folder {
                name, child_count, ..
            } => ObjectView::Folder {
                id: node.id.clone(),
                parent_id,
                name: name.clone(),
                child_count: *child_count,
            },
            Payload::Item(resource) => ObjectView::Item {
                id: node.id.clone(),
                parent_id,
                resource: resource.clone(),
            },
        }
    }

    /// Add a probed item under `parent_id`, resolved within the subtree
    /// matching the item's kind. The root id stands for the corresponding
    /// virtual top folder.
    pub fn add_item(&mut self, resource: Resource, parent_id: &str) -> Result<ObjectId, TreeError> {
        let top = Self::top_for_kind(resource.kind);
        let parent = if parent_id == ROOT_ID {
            top
        } else {
            self.find_folder_in(top, parent_id)
                .ok_or_else(|| TreeError::UnreachableParent(parent_id.to_owned()))?
        };

        let id = self.hasher.digest_path(&resource.path);
        let idx = self.nodes.len();
        self.nodes.push(Node {
            id: id.clone(),
            parent: None,
            prev: None,
            next: None,
            payload: Payload::Item(Arc::new(resource)),
        });
        self.append_child(parent, idx);
        Ok(id)
    }

    /// Add a folder under `parent_id`. One distinct node is created in each
    /// of the three virtual subtrees; all three share the identity derived
    /// from the physical path, so the returned id is unambiguous while the
    /// copies keep independent child chains.
    pub fn add_folder(
        &mut self,
        physical_path: &str,
        name: &str,
        parent_id: &str,
    ) -> Result<ObjectId, TreeError> {
        if physical_path.is_empty() || name.is_empty() {
            return Err(TreeError::EmptyArgument);
        }

        // Resolve all three parents before touching the arena so a failure
        // leaves the tree unchanged.
        let mut parents = [0usize; 3];
        for (slot, top) in parents.iter_mut().zip([MUSIC, PHOTO, VIDEO]) {
            *slot = if parent_id == ROOT_ID {
                top
            } else {
                self.find_folder_in(top, parent_id)
                    .ok_or_else(|| TreeError::UnreachableParent(parent_id.to_owned()))?
            };
        }

        let id = self.hasher.digest_str(physical_path);
        for parent in parents {
            let idx = self.nodes.len();
            self.nodes.push(Node::folder(&id, name, None));
            self.append_child(parent, idx);
        }
        Ok(id)
    }

    /// Empty all three subtrees, keeping the root and virtual folders.
    pub fn reset(&mut self) {
        for top in [MUSIC, PHOTO, VIDEO] {
            loop {
                let (first, _, _) = self.folder_fields(top);
                match first {
                    Some(child) => self.reset_subtree(child),
                    None => break,
                }
            }
        }
        self.nodes.truncate(FIXED_NODES);
    }

    fn reset_subtree(&mut self, idx: usize) {
        loop {
            let (first, _, _) = self.folder_fields(idx);
            match first {
                Some(child) => self.reset_subtree(child),
                None => break,
            }
        }
        self.unlink(idx);
    }

    /// Count children under `id`. Without `recurse` every direct child is
    /// inspected (a `kind` of `None` counts all of them); with `recurse`
    /// every descendant item is, descending into folders unconditionally.
    pub fn count_children(
        &self,
        id: &str,
        kind: Option<MediaKind>,
        recurse: bool,
    ) -> Option<usize> {
        let idx = self.find(id)?;
        Some(self.count_at(idx, kind, recurse))
    }

    fn count_at(&self, idx: usize, kind: Option<MediaKind>, recurse: bool) -> usize {
        let mut count = 0;
        let (mut child, _, _) = self.folder_fields(idx);
        while let Some(c) = child {
            match &self.nodes[c].payload {
                Payload::Folder { .. } => {
                    if kind.is_none() && !recurse {
                        count += 1;
                    }
                    if recurse {
                        count += self.count_at(c, kind, recurse);
                    }
                }
                Payload::Item(resource) => {
                    if kind.map_or(true, |k| resource.kind == k) {
                        count += 1;
                    }
                }
            }
            child = self.nodes[c].next;
        }
        count
    }

    /// Resolve an object id to a view; `None` when unknown (UPnP 701).
    pub fn object(&self, id: &str) -> Option<ObjectView> {
        self.find(id).map(|idx| self.view(idx))
    }

    /// Ordered direct children of a folder; items answer with an empty
    /// list. `None` when the id is unknown.
    pub fn direct_children(&self, id: &str) -> Option<Vec<ObjectView>> {
        let idx = self.find(id)?;
        let mut out = Vec::new();
        let (mut child, _, _) = self.folder_fields(idx);
        while let Some(c) = child {
            out.push(self.view(c));
            child = self.nodes[c].next;
        }
        Some(out)
    }

    /// The `index`-th (zero-based) direct child of one of the three top
    /// subtrees; the vendor index lookup.
    pub fn child_at(&self, top_kind: MediaKind, index: usize) -> Option<ObjectId> {
        let top = Self::top_for_kind(top_kind);
        let (mut child, _, _) = self.folder_fields(top);
        let mut i = 0;
        while let Some(c) = child {
            if i == index {
                return Some(self.nodes[c].id.clone());
            }
            i += 1;
            child = self.nodes[c].next;
        }
        None
    }

    /// The resource behind an item id, for the media streamer.
    pub fn item_resource(&self, id: &str) -> Option<Arc<Resource>> {
        let idx = self.find(id)?;
        match &self.nodes[idx].payload {
            Payload::Item(resource) => Some(resource.clone()),
            Payload::Folder { .. } => None,
        }
    }
}
