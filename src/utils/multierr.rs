use std::error::Error;
use std::fmt;

/// A container for multiple errors
#[derive(Debug)]
pub struct MultiError<E> {
    errors: Vec<E>,
}

impl<E> Default for MultiError<E> {
    fn default() -> Self {
        Self { errors: Vec::new() }
    }
}

impl<E> MultiError<E> {
    pub fn push(&mut self, error: E) {
        self.errors.push(error);
    }

    pub fn errors(&self) -> &[E] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok` when nothing was collected.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl<E: fmt::Display> fmt::Display for MultiError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Multiple errors occurred ({}): ", self.len())?;
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl<E: Error + 'static> Error for MultiError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.errors.first().map(|e| e as &dyn Error)
    }
}
