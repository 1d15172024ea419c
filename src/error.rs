use thiserror::Error;

#[derive(Error, Debug)]
pub enum UnifyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Chunk serialization error: {0}")]
    Serialization(String),

    #[error("Rule syntax error in {file}: {message}")]
    RuleSyntax { file: String, message: String },

    /// The set of name kinds supplied by a record has no entry in the name mapping table
    #[error("no mapping for names combination {0}")]
    NoNameMapping(String),

    /// A field required by `spawn` was never set
    #[error("{0} not set")]
    MissingField(&'static str),

    #[error("failed to build package {ident}: {source}")]
    PackageFailed {
        ident: String,
        #[source]
        source: Box<UnifyError>,
    },

    /// Two distinct packages of one project share a classless hash
    #[error("classless hash collision in project {effname}: {first} and {second}")]
    HashCollision {
        effname: String,
        first: String,
        second: String,
    },

    /// An input to a sorted merge is not strictly ascending by effname
    #[error("merge ordering violated in {stream} stream: {previous:?} followed by {next:?}")]
    MergeOrder {
        stream: &'static str,
        previous: String,
        next: String,
    },
}

impl From<bincode::Error> for UnifyError {
    fn from(e: bincode::Error) -> Self {
        UnifyError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, UnifyError>;
