use crate::node::NodeId;

/// An error raised while compiling a chain.
///
/// Every variant carries the node the compiler was working on when the
/// failure was detected. No partial schedule is ever ticked: any of these
/// aborts the compile and leaves the chain stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DspError {
    /// The depth-first sort discovered a cycle through this node.
    Loop(NodeId),
    /// An input's declared producer has no bound output listing this
    /// consumer; the link is structurally broken.
    Recopy(NodeId),
    /// The node requested in-place processing on an output whose paired
    /// input is unconnected.
    Inplace(NodeId),
    /// A buffer allocation failed.
    Alloc(NodeId),
}

impl DspError {
    /// The node that generated the error.
    pub fn node(&self) -> NodeId {
        match self {
            DspError::Loop(node)
            | DspError::Recopy(node)
            | DspError::Inplace(node)
            | DspError::Alloc(node) => *node,
        }
    }
}

impl std::error::Error for DspError {}

impl std::fmt::Display for DspError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DspError::Loop(node) => {
                write!(f, "compile error: node {:?} lies on a cycle", node)
            }
            DspError::Recopy(node) => {
                write!(
                    f,
                    "compile error: node {:?} cannot find the signal to recopy from a producer",
                    node
                )
            }
            DspError::Inplace(node) => {
                write!(
                    f,
                    "compile error: node {:?} has no input signal for in-place processing",
                    node
                )
            }
            DspError::Alloc(node) => {
                write!(f, "compile error: node {:?} cannot allocate its signal", node)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_the_offending_node() {
        let node = NodeId {
            index: 3,
            generation: 1,
        };
        let err = DspError::Loop(node);
        assert_eq!(err.node(), node);
        assert!(err.to_string().contains("cycle"));
    }
}
