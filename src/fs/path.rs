//! Path string tokenizing

/// A path not starting with '/' is resolved from the caller's directory.
pub fn is_relative(path: &str) -> bool {
    !path.starts_with('/')
}

/// Iterate the components of a path, ignoring repeated and trailing '/'s.
pub fn components(path: &str) -> Components<'_> {
    Components { path: path.as_bytes(), cur: 0 }
}

pub struct Components<'a> {
    path: &'a [u8],
    cur: usize,
}

impl<'a> Components<'a> {
    /// True if no component is left, i.e. only '/'s remain.
    pub fn is_done(&self) -> bool {
        self.path[self.cur..].iter().all(|&b| b == b'/')
    }
}

impl<'a> Iterator for Components<'a> {
    type Item = &'a [u8];

    /// Skip the path starting at cur by '/'s,
    /// hand out the component in between.
    fn next(&mut self) -> Option<Self::Item> {
        let path = self.path;
        let mut cur = self.cur;

        // skip preceding '/'
        while cur < path.len() && path[cur] == b'/' {
            cur += 1;
        }
        if cur == path.len() {
            self.cur = cur;
            return None
        }

        let start = cur;
        while cur < path.len() && path[cur] != b'/' {
            cur += 1;
        }
        self.cur = cur;
        Some(&path[start..cur])
    }
}
