/// Name -> adapter implementation lookup, preserving registration order.
#[derive(Debug, Clone)]
pub struct AdapterTable<T: NamedAdapter> {
    adapters: Vec<T>,
}

pub trait NamedAdapter {
    fn name(&self) -> &str;
}

impl<T: NamedAdapter + ?Sized> NamedAdapter for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: NamedAdapter> Default for AdapterTable<T> {
    fn default() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }
}

impl<T: NamedAdapter> AdapterTable<T> {
    pub fn new(adapters: Vec<T>) -> Self {
        Self { adapters }
    }

    /// Replaces an adapter with the same name, otherwise appends.
    pub fn register(&mut self, adapter: T) {
        if let Some(slot) = self
            .adapters
            .iter_mut()
            .find(|existing| existing.name() == adapter.name())
        {
            *slot = adapter;
            return;
        }
        self.adapters.push(adapter);
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        let trimmed = name.trim();
        self.adapters
            .iter()
            .find(|adapter| adapter.name() == trimmed)
            .or_else(|| {
                self.adapters
                    .iter()
                    .find(|adapter| adapter.name().eq_ignore_ascii_case(trimmed))
            })
    }

    /// Sorted names.
    pub fn list(&self) -> Vec<String> {
        let mut names = self
            .adapters
            .iter()
            .map(|adapter| adapter.name().to_string())
            .collect::<Vec<String>>();
        names.sort();
        names
    }

    pub fn adapters(&self) -> &[T] {
        self.adapters.as_slice()
    }
}
