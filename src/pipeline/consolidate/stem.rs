use rust_stemmers::Algorithm;

/// Maps a single lower-cased word to its stem.
pub trait Stemmer {
    fn stem(&self, word: &str) -> String;
}

/// Snowball stemmer for Portuguese.
///
/// Strips number, gender and common derivational endings, so "arenosa" and
/// "arenosos" or "geradora" and "geradores" share a key.
pub struct PortugueseStemmer {
    inner: rust_stemmers::Stemmer,
}

impl PortugueseStemmer {
    pub fn new() -> Self {
        Self { inner: rust_stemmers::Stemmer::create(Algorithm::Portuguese) }
    }
}

impl Default for PortugueseStemmer {
    fn default() -> Self { Self::new() }
}

impl Stemmer for PortugueseStemmer {
    fn stem(&self, word: &str) -> String {
        self.inner.stem(word).into_owned()
    }
}
