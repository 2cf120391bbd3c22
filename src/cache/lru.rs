//! A doubly linked recency list stored in an arena. Nodes are addressed by a
//! stable index, so the owner of a key can hold on to its position without
//! pointers into the list.

/// Stable handle to a node in a [`LruList`].
pub(crate) type NodeId = usize;

#[derive(Debug)]
struct Node<K> {
    key: K,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

/// Least recently used at the front, most recently used at the back.
#[derive(Debug)]
pub(crate) struct LruList<K> {
    nodes: Vec<Option<Node<K>>>,
    free: Vec<NodeId>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl<K> Default for LruList<K> {
    fn default() -> Self {
        LruList {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }
}

impl<K> LruList<K> {
    pub fn len(&self) -> usize {
        self.len
    }

    fn node(&self, id: NodeId) -> Option<&Node<K>> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node<K>> {
        self.nodes.get_mut(id).and_then(Option::as_mut)
    }

    /// Appends `key` as the most recently used, returning its handle.
    pub fn push_back(&mut self, key: K) -> NodeId {
        let node = Node {
            key,
            prev: self.tail,
            next: None,
        };

        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };

        match self.tail {
            Some(tail) => {
                if let Some(n) = self.node_mut(tail) {
                    n.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
        id
    }

    fn unlink(&mut self, id: NodeId) -> Option<()> {
        let (prev, next) = {
            let n = self.node(id)?;
            (n.prev, n.next)
        };

        match prev {
            Some(p) => self.node_mut(p)?.next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n)?.prev = prev,
            None => self.tail = prev,
        }
        Some(())
    }

    /// Removes the node, returning its key. Unknown handles return None.
    pub fn remove(&mut self, id: NodeId) -> Option<K> {
        self.unlink(id)?;
        let node = self.nodes.get_mut(id)?.take()?;
        self.free.push(id);
        self.len -= 1;
        Some(node.key)
    }

    /// Marks the node as the most recently used.
    pub fn move_to_back(&mut self, id: NodeId) {
        if self.tail == Some(id) || self.node(id).is_none() {
            return;
        }
        if self.unlink(id).is_none() {
            return;
        }

        let tail = self.tail;
        if let Some(n) = self.node_mut(id) {
            n.prev = tail;
            n.next = None;
        }
        match tail {
            Some(t) => {
                if let Some(n) = self.node_mut(t) {
                    n.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }
        self.tail = Some(id);
    }

    /// The least recently used node.
    pub fn front(&self) -> Option<(NodeId, &K)> {
        let id = self.head?;
        Some((id, &self.node(id)?.key))
    }

    /// Keys from least to most recently used.
    pub fn iter(&self) -> Iter<'_, K> {
        Iter {
            list: self,
            next: self.head,
        }
    }
}

pub(crate) struct Iter<'a, K> {
    list: &'a LruList<K>,
    next: Option<NodeId>,
}

impl<'a, K> Iterator for Iter<'a, K> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.list.node(self.next?)?;
        self.next = node.next;
        Some(&node.key)
    }
}
