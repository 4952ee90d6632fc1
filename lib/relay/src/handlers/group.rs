//! Group lifecycle and membership. Every mutating operation except
//! LEAVE_GROUP is reserved to the group admin. Mutations notify the current
//! membership first, then update the repository, then ack the requester, so
//! a removed member always sees its own id come back before it is gone.

use crate::context::ServerContext;
use crate::handlers::{management, reject, sender_is_registered};
use crate::repository::GroupInfo;
use crate::router::{HandlerError, MessageHandler};
use chassis::wire::{MessageType, Params, ProtocolMessage};

pub struct GroupMessageHandler;

impl GroupMessageHandler {
    fn create_group(&self, msg: &ProtocolMessage, ctx: &ServerContext, params: &Params) -> Result<(), HandlerError> {
        let name = params.get("name").unwrap_or("").trim().to_string();

        if name.is_empty() {
            reject(ctx, msg, "", "Group name cannot be empty");
            return Ok(());
        }

        let group_id = ctx.next_id();
        ctx.groups.insert(group_id, GroupInfo::new(group_id, name.clone(), msg.from));

        ctx.send(&management(
            MessageType::CreateGroup,
            msg.from,
            Params::new().with("groupId", group_id).with("name", &name).with("ack", true),
        ));

        Ok(())
    }

    /// Looks the group up and checks the admin requirement, answering the
    /// sender with a FAILED ack when either fails.
    fn admin_group(
        &self,
        msg: &ProtocolMessage,
        ctx: &ServerContext,
        params: &Params,
        denied: &'static str,
    ) -> Option<GroupInfo> {
        let group_id = match params.get_u32("groupId") {
            Some(group_id) => group_id,
            None => {
                reject(ctx, msg, "", "Missing group id");
                return None;
            }
        };

        let group = match ctx.groups.get(&group_id) {
            Some(group) => group,
            None => {
                reject(ctx, msg, "", "Group does not exist");
                return None;
            }
        };

        if !group.is_admin(msg.from) {
            reject(ctx, msg, "", denied);
            return None;
        }

        Some(group)
    }

    fn notify_members(&self, ctx: &ServerContext, group: &GroupInfo, kind: MessageType, params: &Params) {
        for member in group.members.iter() {
            ctx.send(&management(kind, *member, params.clone()));
        }
    }

    fn add_member(&self, msg: &ProtocolMessage, ctx: &ServerContext, params: &Params) -> Result<(), HandlerError> {
        let group = match self.admin_group(msg, ctx, params, "Only the group admin may add members") {
            Some(group) => group,
            None => return Ok(()),
        };

        let new_member = match params.get_u32("newMemberId") {
            Some(new_member) => new_member,
            None => {
                reject(ctx, msg, "", "Missing member id");
                return Ok(());
            }
        };

        if !ctx.users.contains(&new_member) {
            reject(ctx, msg, "", "Member does not exist");
            return Ok(());
        }

        if new_member == group.admin {
            reject(ctx, msg, "", "Admin is already a member");
            return Ok(());
        }

        if group.is_member(new_member) {
            reject(ctx, msg, "", "Already a member");
            return Ok(());
        }

        // Current members learn about the newcomer.
        self.notify_members(
            ctx,
            &group,
            MessageType::AddGroupMember,
            &Params::new().with("groupId", group.id).with("newMemberId", new_member),
        );

        ctx.groups.update(&group.id, |stored| {
            stored.members.insert(new_member);
        });

        // The newcomer gets the full group state.
        let mut state = Params::new()
            .with("groupId", group.id)
            .with("adminId", group.admin)
            .with("name", &group.name);

        for (index, member) in group.members.iter().chain(Some(&new_member)).enumerate() {
            state.set(&format!("member{}", index), *member);
        }

        ctx.send(&management(MessageType::AddGroupMember, new_member, state));

        // Operation ack to the admin.
        ctx.send(&management(
            MessageType::AddGroupMember,
            msg.from,
            Params::new()
                .with("groupId", group.id)
                .with("newMemberId", new_member)
                .with("ack", true),
        ));

        Ok(())
    }

    fn remove_member(&self, msg: &ProtocolMessage, ctx: &ServerContext, params: &Params) -> Result<(), HandlerError> {
        let group = match self.admin_group(msg, ctx, params, "Only the group admin may remove members") {
            Some(group) => group,
            None => return Ok(()),
        };

        let member = match params.get_u32("memberId") {
            Some(member) => member,
            None => {
                reject(ctx, msg, "", "Missing member id");
                return Ok(());
            }
        };

        if !group.is_member(member) {
            reject(ctx, msg, "", "Not a group member");
            return Ok(());
        }

        if member == group.admin {
            reject(ctx, msg, "", "Admin cannot be removed from the group");
            return Ok(());
        }

        // Notify before the repository update: the removed member recognises
        // its own id and drops the group locally.
        self.notify_members(
            ctx,
            &group,
            MessageType::RemoveGroupMember,
            &Params::new().with("groupId", group.id).with("memberId", member),
        );

        ctx.groups.update(&group.id, |stored| {
            stored.members.shift_remove(&member);
        });

        ctx.send(&management(
            MessageType::RemoveGroupMember,
            msg.from,
            Params::new()
                .with("groupId", group.id)
                .with("memberId", member)
                .with("ack", true),
        ));

        Ok(())
    }

    fn leave_group(&self, msg: &ProtocolMessage, ctx: &ServerContext, params: &Params) -> Result<(), HandlerError> {
        let group_id = match params.get_u32("groupId") {
            Some(group_id) => group_id,
            None => {
                reject(ctx, msg, "", "Missing group id");
                return Ok(());
            }
        };

        let group = match ctx.groups.get(&group_id) {
            Some(group) => group,
            None => {
                reject(ctx, msg, "", "Group does not exist");
                return Ok(());
            }
        };

        if !group.is_member(msg.from) {
            reject(ctx, msg, "", "Not a group member");
            return Ok(());
        }

        if group.is_admin(msg.from) {
            reject(ctx, msg, "", "Admin cannot leave the group");
            return Ok(());
        }

        self.notify_members(
            ctx,
            &group,
            MessageType::LeaveGroup,
            &Params::new().with("groupId", group.id).with("memberId", msg.from),
        );

        ctx.groups.update(&group.id, |stored| {
            stored.members.shift_remove(&msg.from);
        });

        ctx.send(&management(
            MessageType::LeaveGroup,
            msg.from,
            Params::new().with("groupId", group.id).with("ack", true),
        ));

        Ok(())
    }

    fn update_name(&self, msg: &ProtocolMessage, ctx: &ServerContext, params: &Params) -> Result<(), HandlerError> {
        let group = match self.admin_group(msg, ctx, params, "Only the group admin may rename the group") {
            Some(group) => group,
            None => return Ok(()),
        };

        let name = params.get("name").unwrap_or("").trim().to_string();

        if name.is_empty() {
            reject(ctx, msg, "", "Group name cannot be empty");
            return Ok(());
        }

        ctx.groups.update(&group.id, |stored| stored.name = name.clone());

        self.notify_members(
            ctx,
            &group,
            MessageType::UpdateGroupName,
            &Params::new().with("groupId", group.id).with("name", &name),
        );

        ctx.send(&management(
            MessageType::UpdateGroupName,
            msg.from,
            Params::new().with("groupId", group.id).with("ack", true),
        ));

        Ok(())
    }

    fn delete_group(&self, msg: &ProtocolMessage, ctx: &ServerContext, params: &Params) -> Result<(), HandlerError> {
        let group = match self.admin_group(msg, ctx, params, "Only the group admin may delete the group") {
            Some(group) => group,
            None => return Ok(()),
        };

        self.notify_members(
            ctx,
            &group,
            MessageType::DeleteGroup,
            &Params::new().with("groupId", group.id),
        );

        ctx.groups.remove(&group.id);

        ctx.send(&management(
            MessageType::DeleteGroup,
            msg.from,
            Params::new().with("groupId", group.id).with("ack", true),
        ));

        Ok(())
    }
}

impl MessageHandler for GroupMessageHandler {
    fn name(&self) -> &'static str {
        "GroupMessageHandler"
    }

    fn can_handle(&self, kind: MessageType) -> bool {
        match kind {
            MessageType::CreateGroup
            | MessageType::DeleteGroup
            | MessageType::LeaveGroup
            | MessageType::AddGroupMember
            | MessageType::RemoveGroupMember
            | MessageType::UpdateGroupName => true,
            _ => false,
        }
    }

    fn handle(&self, msg: &ProtocolMessage, ctx: &ServerContext) -> Result<(), HandlerError> {
        let params = msg
            .params()
            .ok_or(HandlerError::Invariant("management message without params"))?;

        if !sender_is_registered(msg, ctx) {
            reject(ctx, msg, "", "Sender not registered");
            return Ok(());
        }

        match msg.kind {
            MessageType::CreateGroup => self.create_group(msg, ctx, params),
            MessageType::AddGroupMember => self.add_member(msg, ctx, params),
            MessageType::RemoveGroupMember => self.remove_member(msg, ctx, params),
            MessageType::LeaveGroup => self.leave_group(msg, ctx, params),
            MessageType::UpdateGroupName => self.update_name(msg, ctx, params),
            MessageType::DeleteGroup => self.delete_group(msg, ctx, params),
            _ => Err(HandlerError::Invariant("unroutable group kind")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testkit::{bed, management_from, TestBed};
    use chassis::wire::{AckStatus, MessageBody};
    use chassis::ClientId;
    use mio::Token;

    fn failed_reason(msg: &ProtocolMessage) -> String {
        match &msg.body {
            MessageBody::Ack(ack) => {
                assert_eq!(ack.status, AckStatus::Failed);
                ack.error_reason.clone().unwrap_or_default()
            }
            body => panic!("Expected failed ack, got {:?}", body),
        }
    }

    /// Admin 1 plus members 2 and 3 in group `gid`.
    fn standard_group(bed: &TestBed) -> ClientId {
        bed.connect_user(Token(1), 1, "admin");
        bed.connect_user(Token(2), 2, "b");
        bed.connect_user(Token(3), 3, "c");

        let gid = 10;
        let mut group = GroupInfo::new(gid, "g".to_string(), 1);
        group.members.insert(2);
        group.members.insert(3);
        bed.ctx.groups.insert(gid, group);

        gid
    }

    #[test]
    fn test_create_group_admin_is_sole_member() {
        let bed = bed();
        bed.connect_user(Token(1), 1, "admin");

        let msg = management_from(MessageType::CreateGroup, 1, Params::new().with("name", "g"));
        bed.run_as(Token(1), || GroupMessageHandler.handle(&msg, &bed.ctx))
            .unwrap();

        let replies = bed.sent_to(1);
        assert_eq!(replies.len(), 1);
        let params = replies[0].params().unwrap();
        let group_id = params.get_u32("groupId").unwrap();
        assert_eq!(params.get("name"), Some("g"));
        assert_eq!(params.get_bool("ack"), Some(true));

        let group = bed.ctx.groups.get(&group_id).unwrap();
        assert_eq!(group.admin, 1);
        assert!(group.is_member(1));
        assert_eq!(group.members.len(), 1);
    }

    #[test]
    fn test_add_member_notifies_then_updates_then_acks() {
        let bed = bed();
        bed.connect_user(Token(1), 1, "admin");
        bed.connect_user(Token(2), 2, "b");
        let gid = 10;
        bed.ctx.groups.insert(gid, GroupInfo::new(gid, "g".to_string(), 1));

        let msg = management_from(
            MessageType::AddGroupMember,
            1,
            Params::new().with("groupId", gid).with("newMemberId", 2u32),
        );
        bed.run_as(Token(1), || GroupMessageHandler.handle(&msg, &bed.ctx))
            .unwrap();

        // Admin sees the member notification then the ack.
        let to_admin = bed.sent_to(1);
        assert_eq!(to_admin.len(), 2);
        assert_eq!(to_admin[0].params().unwrap().get_u32("newMemberId"), Some(2));
        assert_eq!(to_admin[0].params().unwrap().get_bool("ack"), None);
        assert_eq!(to_admin[1].params().unwrap().get_bool("ack"), Some(true));

        // The joiner gets the full state.
        let to_joiner = bed.sent_to(2);
        assert_eq!(to_joiner.len(), 1);
        let state = to_joiner[0].params().unwrap();
        assert_eq!(state.get_u32("groupId"), Some(gid));
        assert_eq!(state.get_u32("adminId"), Some(1));
        assert_eq!(state.get("name"), Some("g"));
        assert_eq!(state.get_u32("member0"), Some(1));
        assert_eq!(state.get_u32("member1"), Some(2));

        assert!(bed.ctx.groups.get(&gid).unwrap().is_member(2));
    }

    #[test]
    fn test_non_admin_mutations_rejected() {
        let bed = bed();
        let gid = standard_group(&bed);

        let attempts = vec![
            management_from(
                MessageType::AddGroupMember,
                2,
                Params::new().with("groupId", gid).with("newMemberId", 3u32),
            ),
            management_from(
                MessageType::RemoveGroupMember,
                2,
                Params::new().with("groupId", gid).with("memberId", 3u32),
            ),
            management_from(
                MessageType::UpdateGroupName,
                2,
                Params::new().with("groupId", gid).with("name", "x"),
            ),
            management_from(MessageType::DeleteGroup, 2, Params::new().with("groupId", gid)),
        ];

        for attempt in attempts {
            bed.run_as(Token(2), || GroupMessageHandler.handle(&attempt, &bed.ctx))
                .unwrap();

            let to_sender = bed.sent_to(2);
            assert_eq!(to_sender.len(), 1);
            assert!(failed_reason(&to_sender[0]).starts_with("Only the group admin"));
        }

        // Group unchanged throughout.
        let group = bed.ctx.groups.get(&gid).unwrap();
        assert_eq!(group.name, "g");
        assert_eq!(group.members.len(), 3);
    }

    #[test]
    fn test_remove_member_notifies_all_then_acks_admin() {
        let bed = bed();
        let gid = standard_group(&bed);

        let msg = management_from(
            MessageType::RemoveGroupMember,
            1,
            Params::new().with("groupId", gid).with("memberId", 3u32),
        );
        bed.run_as(Token(1), || GroupMessageHandler.handle(&msg, &bed.ctx))
            .unwrap();

        // Every member of the pre-removal snapshot got the notification,
        // including the removed member.
        for member in [2u32, 3u32].iter() {
            let received = bed.sent_to(*member);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].params().unwrap().get_u32("memberId"), Some(3));
        }

        let to_admin = bed.sent_to(1);
        assert_eq!(to_admin.len(), 2);
        assert_eq!(to_admin[1].params().unwrap().get_bool("ack"), Some(true));

        assert!(!bed.ctx.groups.get(&gid).unwrap().is_member(3));
    }

    #[test]
    fn test_leave_group_member_leaves_admin_cannot() {
        let bed = bed();
        let gid = standard_group(&bed);

        let msg = management_from(MessageType::LeaveGroup, 2, Params::new().with("groupId", gid));
        bed.run_as(Token(2), || GroupMessageHandler.handle(&msg, &bed.ctx))
            .unwrap();

        assert!(!bed.ctx.groups.get(&gid).unwrap().is_member(2));

        // Leaver got the member notification plus the ack.
        let to_leaver = bed.sent_to(2);
        assert_eq!(to_leaver.len(), 2);
        assert_eq!(to_leaver[1].params().unwrap().get_bool("ack"), Some(true));

        let admin_attempt = management_from(MessageType::LeaveGroup, 1, Params::new().with("groupId", gid));
        bed.run_as(Token(1), || GroupMessageHandler.handle(&admin_attempt, &bed.ctx))
            .unwrap();

        // Drain the earlier leave notification first.
        let to_admin = bed.sent_to(1);
        let last = to_admin.last().unwrap();
        assert_eq!(failed_reason(last), "Admin cannot leave the group");
        assert!(bed.ctx.groups.get(&gid).unwrap().is_member(1));
    }

    #[test]
    fn test_update_name_notifies_members() {
        let bed = bed();
        let gid = standard_group(&bed);

        let msg = management_from(
            MessageType::UpdateGroupName,
            1,
            Params::new().with("groupId", gid).with("name", "renamed"),
        );
        bed.run_as(Token(1), || GroupMessageHandler.handle(&msg, &bed.ctx))
            .unwrap();

        assert_eq!(bed.ctx.groups.get(&gid).unwrap().name, "renamed");

        for member in [2u32, 3u32].iter() {
            let received = bed.sent_to(*member);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].params().unwrap().get("name"), Some("renamed"));
        }
    }

    #[test]
    fn test_delete_group_notifies_then_removes() {
        let bed = bed();
        let gid = standard_group(&bed);

        let msg = management_from(MessageType::DeleteGroup, 1, Params::new().with("groupId", gid));
        bed.run_as(Token(1), || GroupMessageHandler.handle(&msg, &bed.ctx))
            .unwrap();

        for member in [2u32, 3u32].iter() {
            let received = bed.sent_to(*member);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].kind, MessageType::DeleteGroup);
        }

        assert!(bed.ctx.groups.get(&gid).is_none());
    }

    #[test]
    fn test_empty_group_name_rejected() {
        let bed = bed();
        bed.connect_user(Token(1), 1, "admin");

        let msg = management_from(MessageType::CreateGroup, 1, Params::new().with("name", " "));
        bed.run_as(Token(1), || GroupMessageHandler.handle(&msg, &bed.ctx))
            .unwrap();

        let to_sender = bed.sent_to(1);
        assert_eq!(failed_reason(&to_sender[0]), "Group name cannot be empty");
    }
}
