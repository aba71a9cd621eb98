//! The game-tree node interface the driver searches against.
//!
//! The hub owns its game tree; the driver only needs a narrow view of a
//! node: whether it is still valid, the FEN of the root it descends
//! from, the move history leading to it, and which move tokens it
//! accepts as legal. [`BoardNode`] is a ready-made implementation backed
//! by `cozy-chess` for hubs (and tests) that do not bring their own
//! tree.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cozy_chess::{Board, File, GameStatus, Move, Piece, Square};

/// How castling moves are written on the wire.
///
/// Classical engines expect the king-moves-two-squares form (`e1g1`);
/// engines with `UCI_Chess960` enabled expect the king-captures-own-rook
/// form (`e1h1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastlingNotation {
    Classical,
    KingTakesRook,
}

/// A position in the hub's game tree, as seen by the driver.
///
/// Nodes are shared immutably; the owner may mark a node destroyed at
/// any time and the driver consults [`GameNode::is_destroyed`] before
/// every use.
pub trait GameNode: Send + Sync {
    /// True once the owner has invalidated this node.
    fn is_destroyed(&self) -> bool;

    /// True if the position has no continuation (mate, stalemate, draw).
    fn is_terminal(&self) -> bool;

    /// FEN of the root position this node's history starts from.
    fn root_fen(&self) -> String;

    /// Move tokens from the root to this node, in the given notation.
    fn history_uci(&self, notation: CastlingNotation) -> Vec<String>;

    /// The subset of `tokens` that are legal moves in this position,
    /// in their original order. Always returns a fresh vector.
    fn validate_moves(&self, tokens: &[String]) -> Vec<String>;
}

/// Shared handle to a game-tree node.
pub type NodeRef = Arc<dyn GameNode>;

/// Node identity. Two handles are the same node only if they point at
/// the same allocation.
pub fn same_node(a: &NodeRef, b: &NodeRef) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Invalid FEN: {0}")]
    InvalidFen(String),
    #[error("Illegal move: {0}")]
    IllegalMove(String),
}

/// A [`GameNode`] backed by a `cozy-chess` board.
///
/// Stores the root position plus the line of moves leading to the node;
/// each [`BoardNode::play`] produces a fresh child node, so handles are
/// immutable and safely shared. `destroy` flips a flag the owner can set
/// from any thread.
#[derive(Debug)]
pub struct BoardNode {
    root: Board,
    root_fen: String,
    line: Vec<Move>,
    position: Board,
    destroyed: AtomicBool,
}

impl BoardNode {
    /// Node at the standard starting position.
    pub fn startpos() -> Arc<Self> {
        let root = Board::default();
        Arc::new(Self {
            root_fen: root.to_string(),
            position: root.clone(),
            root,
            line: Vec::new(),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Root node at an arbitrary position.
    pub fn from_fen(fen: &str) -> Result<Arc<Self>, NodeError> {
        let root: Board = fen
            .parse()
            .map_err(|_| NodeError::InvalidFen(fen.to_string()))?;
        Ok(Arc::new(Self {
            root_fen: root.to_string(),
            position: root.clone(),
            root,
            line: Vec::new(),
            destroyed: AtomicBool::new(false),
        }))
    }

    /// Child node after playing `token` (either castling notation is
    /// accepted) in this position.
    pub fn play(&self, token: &str) -> Result<Arc<Self>, NodeError> {
        let mv = resolve_token(&self.position, token)
            .ok_or_else(|| NodeError::IllegalMove(token.to_string()))?;
        let mut position = self.position.clone();
        position.play(mv);
        let mut line = self.line.clone();
        line.push(mv);
        Ok(Arc::new(Self {
            root: self.root.clone(),
            root_fen: self.root_fen.clone(),
            line,
            position,
            destroyed: AtomicBool::new(false),
        }))
    }

    /// Mark the node invalid. The driver abandons any search on it.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    /// The board at this node.
    pub fn position(&self) -> &Board {
        &self.position
    }
}

impl GameNode for BoardNode {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn is_terminal(&self) -> bool {
        self.position.status() != GameStatus::Ongoing
    }

    fn root_fen(&self) -> String {
        self.root_fen.clone()
    }

    fn history_uci(&self, notation: CastlingNotation) -> Vec<String> {
        let mut board = self.root.clone();
        let mut tokens = Vec::with_capacity(self.line.len());
        for &mv in &self.line {
            tokens.push(format_move(&board, mv, notation));
            board.play(mv);
        }
        tokens
    }

    fn validate_moves(&self, tokens: &[String]) -> Vec<String> {
        let legal = legal_moves(&self.position);
        tokens
            .iter()
            .filter(|token| {
                legal.iter().any(|&mv| {
                    format_move(&self.position, mv, CastlingNotation::KingTakesRook) == **token
                        || format_move(&self.position, mv, CastlingNotation::Classical) == **token
                })
            })
            .cloned()
            .collect()
    }
}

fn legal_moves(board: &Board) -> Vec<Move> {
    let mut moves = Vec::new();
    board.generate_moves(|mvs| {
        moves.extend(mvs);
        false
    });
    moves
}

/// True if `mv` castles: the king lands on a square holding its own
/// rook, which is how cozy-chess encodes castling.
fn is_castling(board: &Board, mv: Move) -> bool {
    board.piece_on(mv.from) == Some(Piece::King)
        && board.color_on(mv.to) == Some(board.side_to_move())
        && board.piece_on(mv.to) == Some(Piece::Rook)
}

/// Format a move as a UCI token in the requested castling notation.
fn format_move(board: &Board, mv: Move, notation: CastlingNotation) -> String {
    if notation == CastlingNotation::Classical && is_castling(board, mv) {
        let to_file = if (mv.to.file() as usize) > (mv.from.file() as usize) {
            File::G
        } else {
            File::C
        };
        let to = Square::new(to_file, mv.from.rank());
        return format!("{}{}", mv.from, to);
    }
    mv.to_string()
}

/// Find the legal move matching `token` in either castling notation.
fn resolve_token(board: &Board, token: &str) -> Option<Move> {
    legal_moves(board).into_iter().find(|&mv| {
        format_move(board, mv, CastlingNotation::KingTakesRook) == token
            || format_move(board, mv, CastlingNotation::Classical) == token
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::STARTPOS_FEN;

    #[test]
    fn test_startpos_fen_matches_constant() {
        let node = BoardNode::startpos();
        assert_eq!(node.root_fen(), STARTPOS_FEN);
    }

    #[test]
    fn test_history_tokens() {
        let node = BoardNode::startpos()
            .play("e2e4")
            .unwrap()
            .play("e7e5")
            .unwrap();
        assert_eq!(
            node.history_uci(CastlingNotation::Classical),
            vec!["e2e4", "e7e5"]
        );
    }

    #[test]
    fn test_castling_notation_conversion() {
        // Both sides may castle either way.
        let node = BoardNode::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let kingside = node.play("e1g1").unwrap();
        assert_eq!(
            kingside.history_uci(CastlingNotation::Classical),
            vec!["e1g1"]
        );
        assert_eq!(
            kingside.history_uci(CastlingNotation::KingTakesRook),
            vec!["e1h1"]
        );

        // The native token resolves to the same move.
        let via_native = node.play("e1h1").unwrap();
        assert_eq!(
            via_native.history_uci(CastlingNotation::Classical),
            vec!["e1g1"]
        );
    }

    #[test]
    fn test_validate_moves_filters_illegal() {
        let node = BoardNode::startpos();
        let requested = vec![
            "e2e4".to_string(),
            "e7e5".to_string(), // black's move, not legal for white
            "nonsense".to_string(),
            "g1f3".to_string(),
        ];
        let validated = node.validate_moves(&requested);
        assert_eq!(validated, vec!["e2e4", "g1f3"]);
        // The caller's vector is untouched.
        assert_eq!(requested.len(), 4);
    }

    #[test]
    fn test_terminal_detection() {
        // Fool's mate delivered; white is mated.
        let node = BoardNode::startpos()
            .play("f2f3")
            .unwrap()
            .play("e7e5")
            .unwrap()
            .play("g2g4")
            .unwrap()
            .play("d8h4")
            .unwrap();
        assert!(node.is_terminal());
        assert!(node.validate_moves(&["e2e4".to_string()]).is_empty());
    }

    #[test]
    fn test_destroy_is_visible_through_trait() {
        let node = BoardNode::startpos();
        let shared: NodeRef = node.clone();
        assert!(!shared.is_destroyed());
        node.destroy();
        assert!(shared.is_destroyed());
    }

    #[test]
    fn test_same_node_is_identity() {
        let a: NodeRef = BoardNode::startpos();
        let b: NodeRef = BoardNode::startpos();
        assert!(same_node(&a, &a.clone()));
        assert!(!same_node(&a, &b));
    }
}
