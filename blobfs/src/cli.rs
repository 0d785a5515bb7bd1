use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub(crate) struct Args {
    /// Directory holding the blob containers
    #[arg(long, env = "BLOBFS_STORAGE_DIR", default_value = "/var/lib/blobfs")]
    pub(crate) storage_dir: String,

    /// Container the driver works in
    #[arg(long, env = "BLOBFS_CONTAINER", default_value = "registry")]
    pub(crate) container: String,

    /// Key prefix every virtual path is stored under
    #[arg(long, env = "BLOBFS_ROOTDIRECTORY", default_value = "")]
    pub(crate) root_directory: String,

    /// Largest chunk sent in a single append
    #[arg(long, env = "BLOBFS_CHUNK_SIZE", default_value_t = 4 * 1024 * 1024)]
    pub(crate) chunk_size: usize,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    #[command(about = "Show whether a path is a file or a virtual directory")]
    Stat {
        #[arg(value_name = "PATH")]
        path: String,
    },
    #[command(about = "List the direct descendants of a path")]
    Ls {
        #[arg(value_name = "PATH", default_value = "/")]
        path: String,
    },
    #[command(about = "Print the content of a file")]
    Cat {
        #[arg(value_name = "PATH")]
        path: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    #[command(about = "Store a local file at a path in one call")]
    Put {
        #[arg(value_name = "PATH")]
        path: String,
        #[arg(value_name = "FILE")]
        file: String,
    },
    #[command(about = "Upload a local file in chunks through a writer")]
    Upload {
        #[arg(value_name = "PATH")]
        path: String,
        #[arg(value_name = "FILE")]
        file: String,
        /// Resume an existing upload instead of replacing it
        #[arg(long)]
        append: bool,
    },
    #[command(about = "Move a file to a new path")]
    Mv {
        #[arg(value_name = "SOURCE")]
        source: String,
        #[arg(value_name = "DEST")]
        dest: String,
    },
    #[command(about = "Delete a file or everything below a virtual directory")]
    Rm {
        #[arg(value_name = "PATH")]
        path: String,
    },
    #[command(about = "Walk a subtree and print every entry")]
    Tree {
        #[arg(value_name = "PATH", default_value = "/")]
        path: String,
    },
}
