use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::MaybeTlsStream;

use crate::{
    Bet, ErrorKind, PlatformStats, Poll, PollQuery, PotentialPoll, TokenMetrics, Tokens, User,
    UserStats,
};

#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
pub enum Request {
    Login { user: String },
    Register { user: String },
    WhoAmI,
    PollData,
    QueryPolls(PollQuery),
    GetPoll { poll_id: String },
    TrendingPolls { limit: usize },
    MyBets,
    CreatePoll(PotentialPoll),
    PlaceBet { poll_id: String, option_id: String, amount: Tokens },
    QuoteReturn { poll_id: String, option_id: String, amount: Tokens },
    ResolvePoll { poll_id: String, winning_option_id: String }, //None response
    CancelPoll { poll_id: String },                             //None response
    PlatformStats,
    MyStats,
    UpdateWallet { address: String },
    DepositAddress,
    VerifyDeposit { tx_hash: String },
    TokenMetrics,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub enum Response {
    None,
    SuccessfulLogin(User),
    WhoAmI(User),
    PollData(Vec<Poll>),
    Poll(Option<Poll>),
    Bets(Vec<Bet>),
    PollCreated(Poll),
    BetPlaced(Bet),
    Quote(Tokens),
    PlatformStats(PlatformStats),
    UserStats(UserStats),
    DepositAddress(String),
    DepositVerified(bool),
    TokenMetrics(TokenMetrics),
    Rejected { kind: ErrorKind, message: String },
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub enum Packet {
    RequestPacket(Request),
    ResponsePacket(Response),
    Error,
}

pub struct Connection {
    connection: socket::TungsteniteWebSocket,
}

impl Connection {
    pub async fn from_tcp_stream(connection: TcpStream) -> anyhow::Result<Self> {
        let ws = socket::TungsteniteWebSocket::accept(connection).await?;

        Ok(Self { connection: ws })
    }

    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        Ok(Self {
            connection: socket::TungsteniteWebSocket::connect(address).await?,
        })
    }

    pub async fn read(&mut self) -> anyhow::Result<Packet> {
        Ok(rmp_serde::from_slice(&self.connection.read().await?)?)
    }

    pub async fn send(&mut self, data: Packet) -> anyhow::Result<()> {
        self.connection.write_all(&rmp_serde::to_vec(&data)?).await
    }

    /// Sends a request and waits for the matching response packet.
    pub async fn request(&mut self, request: Request) -> anyhow::Result<Response> {
        self.send(Packet::RequestPacket(request)).await?;
        match self.read().await? {
            Packet::ResponsePacket(response) => Ok(response),
            other => anyhow::bail!("expected a response, received {:?}", other),
        }
    }
}

mod socket {
    use anyhow::bail;
    use futures_util::{SinkExt, StreamExt};
    use std::io::ErrorKind;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    use super::MaybeTlsStream;

    pub struct TungsteniteWebSocket {
        socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    }

    impl TungsteniteWebSocket {
        pub async fn accept(stream: TcpStream) -> anyhow::Result<Self> {
            let ws_stream = tokio_tungstenite::accept_async(MaybeTlsStream::Plain(stream)).await?;
            Ok(Self { socket: ws_stream })
        }

        pub async fn connect(address: &str) -> anyhow::Result<Self> {
            let (ws_stream, _) = tokio_tungstenite::connect_async(address).await?;
            Ok(Self { socket: ws_stream })
        }

        pub async fn read(&mut self) -> anyhow::Result<Vec<u8>> {
            loop {
                let message = match self.socket.next().await {
                    Some(Ok(message)) => message,
                    Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed))
                    | Some(Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)))
                    | None => return Err(closed().into()),
                    Some(Err(e)) => return Err(e.into()),
                };
                match message {
                    Message::Binary(data) => return Ok(data),
                    Message::Ping(_) | Message::Pong(_) => continue,
                    Message::Close(_) => return Err(closed().into()),
                    _ => bail!("incorrect data type received"),
                }
            }
        }

        pub async fn write_all(&mut self, buf: &[u8]) -> anyhow::Result<()> {
            Ok(self.socket.send(Message::Binary(buf.to_vec())).await?)
        }
    }

    fn closed() -> std::io::Error {
        std::io::Error::new(ErrorKind::ConnectionAborted, "connection closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packets_survive_msgpack() {
        let packet = Packet::RequestPacket(Request::PlaceBet {
            poll_id: "poll_1".into(),
            option_id: "poll_1_1".into(),
            amount: 200.0,
        });
        let bytes = rmp_serde::to_vec(&packet).unwrap();
        let decoded: Packet = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn rejections_carry_their_kind() {
        let packet = Packet::ResponsePacket(Response::Rejected {
            kind: ErrorKind::State,
            message: "poll poll_1 is not active".into(),
        });
        let bytes = rmp_serde::to_vec(&packet).unwrap();
        match rmp_serde::from_slice::<Packet>(&bytes).unwrap() {
            Packet::ResponsePacket(Response::Rejected { kind, .. }) => {
                assert_eq!(kind, ErrorKind::State)
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }
}
